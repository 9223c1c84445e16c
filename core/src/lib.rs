//! # Age Saga Core
//!
//! Core traits and types shared by the services that take part in the age
//! computation saga.
//!
//! The saga is a choreography: no service calls another directly. Each service
//! reacts to events it receives from the [`event_bus::EventBus`] and emits its
//! own events in turn.
//!
//! ## Core Concepts
//!
//! - **Event**: an immutable fact, encoded into a [`event::SerializedEvent`] envelope
//! - **Event bus**: keyed publish plus consumer-group subscriptions with
//!   at-least-once delivery ([`event_bus::Delivery`] must be acknowledged)
//! - **Clock**: injected time source so age computation is deterministic in tests
//! - **Store errors**: one error vocabulary for every persistence adapter
//!
//! ## Example
//!
//! ```ignore
//! use age_saga_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! async fn drain(bus: &dyn EventBus) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut stream = bus.subscribe("age-service", &["person-created-topic"]).await?;
//!     while let Some(delivery) = stream.next().await {
//!         let delivery = delivery?;
//!         // process delivery.event ...
//!         delivery.ack();
//!     }
//!     Ok(())
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use serde::{Deserialize, Serialize};

pub mod event;
pub mod event_bus;
pub mod store;

/// Environment module - Dependency injection traits
///
/// External dependencies that change between production and tests are
/// abstracted behind traits and injected into the services.
pub mod environment {
    use chrono::{DateTime, NaiveDate, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use age_saga_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let now = clock.now();
    /// assert_eq!(clock.today(), now.date_naive());
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// The current calendar date (UTC).
        fn today(&self) -> NaiveDate {
            self.now().date_naive()
        }
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_today_matches_now() {
        let clock = SystemClock;
        let before = chrono::Utc::now().date_naive();
        let today = clock.today();
        let after = chrono::Utc::now().date_naive();
        assert!(today >= before && today <= after);
    }
}
