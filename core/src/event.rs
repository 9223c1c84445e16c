//! Event trait and the envelope events travel in.
//!
//! Events represent facts about things that have happened and are immutable.
//! A service never sends a bare event over the bus: it encodes the event into a
//! [`SerializedEvent`] envelope that carries the event type identifier, the
//! payload bytes and [`EventMetadata`] used to correlate the steps of one saga.
//!
//! # Design
//!
//! Payloads are serialized with `bincode`. Both services are Rust services that
//! share the contract crate, so a compact binary format is enough and no schema
//! negotiation takes place.
//!
//! # Example
//!
//! ```
//! use age_saga_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct AccountOpened {
//!     account_id: String,
//! }
//!
//! impl Event for AccountOpened {
//!     fn event_type(&self) -> &'static str {
//!         "AccountOpened.v1"
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// The envelope carries a different event type than the one expected.
    #[error("Unexpected event type: expected {expected}, got {actual}")]
    UnexpectedEventType {
        /// Event type the caller asked for
        expected: &'static str,
        /// Event type found in the envelope
        actual: String,
    },
}

/// An event that can be published on the bus.
///
/// # Event Naming Convention
///
/// The `event_type()` method should return a stable string identifier that
/// includes a version number, for example `"PersonCreated.v1"`.
///
/// # Thread Safety
///
/// Events must be `Send + Sync + 'static` to be passed between worker tasks.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// encode a different schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Metadata attached to every envelope.
///
/// The correlation id ties together every event caused by one HTTP request;
/// the causation id names the event (or request) that directly caused this one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Identifier shared by all events of one saga instance.
    pub correlation_id: Option<String>,
    /// Identifier of the message that caused this event.
    pub causation_id: Option<String>,
    /// Name of the service that produced the event.
    pub source: Option<String>,
    /// When the event was produced.
    pub produced_at: Option<DateTime<Utc>>,
}

impl EventMetadata {
    /// Metadata produced by `source` at `produced_at`.
    #[must_use]
    pub fn new(source: impl Into<String>, produced_at: DateTime<Utc>) -> Self {
        Self {
            source: Some(source.into()),
            produced_at: Some(produced_at),
            ..Self::default()
        }
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the causation id.
    #[must_use]
    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Metadata for an event caused by a message carrying `self`.
    ///
    /// The correlation id is kept, the causation id becomes `cause`.
    #[must_use]
    pub fn caused_by(
        &self,
        cause: impl Into<String>,
        source: impl Into<String>,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            causation_id: Some(cause.into()),
            source: Some(source.into()),
            produced_at: Some(produced_at),
        }
    }
}

/// A serialized event, the unit carried by the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "PersonCreated.v1").
    pub event_type: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Correlation and provenance data.
    pub metadata: EventMetadata,
}

impl SerializedEvent {
    /// Create a new serialized event.
    ///
    /// # Examples
    ///
    /// ```
    /// use age_saga_core::event::{EventMetadata, SerializedEvent};
    ///
    /// let event = SerializedEvent::new(
    ///     "PersonCreated.v1".to_string(),
    ///     vec![1, 2, 3, 4],
    ///     EventMetadata::default(),
    /// );
    /// assert_eq!(event.data.len(), 4);
    /// ```
    #[must_use]
    pub const fn new(event_type: String, data: Vec<u8>, metadata: EventMetadata) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Create a serialized event from an `Event`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: EventMetadata,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }

    /// Decode the payload as `E`, checking the event type first.
    ///
    /// # Errors
    ///
    /// Returns `EventError::UnexpectedEventType` when the envelope holds another
    /// event type and `EventError::DeserializationError` when the payload does
    /// not decode.
    pub fn decode<E: Event + DeserializeOwned>(
        &self,
        expected_type: &'static str,
    ) -> Result<E, EventError> {
        if self.event_type != expected_type {
            return Err(EventError::UnexpectedEventType {
                expected: expected_type,
                actual: self.event_type.clone(),
            });
        }
        E::from_bytes(&self.data)
    }

    /// Encode the whole envelope for a transport that carries opaque bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode an envelope produced by [`SerializedEvent::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
