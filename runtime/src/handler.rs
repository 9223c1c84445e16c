//! Event handler trait used by the consumer loop.
//!
//! A handler receives the whole [`Delivery`] (envelope, key and attempt
//! number) and answers with a [`Disposition`]. The handler never touches the
//! acknowledgement handle; [`EventConsumer`](crate::consumer::EventConsumer)
//! acknowledges or rejects the delivery based on the answer.
//!
//! # Example
//!
//! ```rust,ignore
//! use age_saga_runtime::handler::{Disposition, EventHandler};
//! use async_trait::async_trait;
//!
//! struct AuditHandler;
//!
//! #[async_trait]
//! impl EventHandler for AuditHandler {
//!     async fn handle(&self, delivery: &Delivery) -> Disposition {
//!         tracing::info!(event = %delivery.event, "Audited");
//!         Disposition::Ack
//!     }
//! }
//! ```

use age_saga_core::event_bus::{AckDecision, Delivery};
use async_trait::async_trait;

/// What the consumer should do with a delivery once the handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished (successfully or terminally); advance past the record.
    Ack,
    /// Processing did not finish; deliver the record again.
    Redeliver {
        /// Why the record must come back
        reason: String,
    },
}

impl Disposition {
    /// Ask for redelivery.
    #[must_use]
    pub fn redeliver(reason: impl Into<String>) -> Self {
        Self::Redeliver {
            reason: reason.into(),
        }
    }

    /// Metric label of the disposition.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Redeliver { .. } => "redeliver",
        }
    }

    /// Acknowledgement sent to the bus.
    #[must_use]
    pub const fn decision(&self) -> AckDecision {
        match self {
            Self::Ack => AckDecision::Ack,
            Self::Redeliver { .. } => AckDecision::Nack,
        }
    }
}

/// Handler for one consumer subscription.
///
/// # Thread Safety
///
/// Handlers are shared by every worker of a [`ConsumerPool`](crate::consumer::ConsumerPool)
/// and must be `Send + Sync + 'static`.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Process one delivery to completion.
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_maps_to_decision() {
        assert_eq!(Disposition::Ack.decision(), AckDecision::Ack);
        assert_eq!(
            Disposition::redeliver("store down").decision(),
            AckDecision::Nack
        );
        assert_eq!(Disposition::redeliver("x").label(), "redeliver");
    }
}
