//! # Age Saga Testing
//!
//! Test doubles for the saga services.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic, settable time
//! - [`InMemoryEventBus`]: partitioned bus with consumer groups and acknowledgements
//! - [`FlakyEventBus`]: wraps a bus and fails publishes on demand
//!
//! ## Example
//!
//! ```ignore
//! use age_saga_testing::{InMemoryEventBus, test_clock};
//!
//! #[tokio::test]
//! async fn person_gets_an_age() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     let clock = Arc::new(test_clock());
//!     // wire both services on `bus` ...
//! }
//! ```

use age_saga_core::environment::Clock;
use chrono::{DateTime, Utc};

pub mod event_bus;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use age_saga_core::event::SerializedEvent;
    use age_saga_core::event_bus::{EventBus, EventBusError, EventStream};
    use chrono::{Duration, NaiveDate, NaiveTime};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, PoisonError, RwLock};

    pub use crate::event_bus::InMemoryEventBus;

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::set`] or
    /// [`FixedClock::advance`]. Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use age_saga_testing::mocks::FixedClock;
    /// use age_saga_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// A clock standing at midnight UTC of `date`.
        #[must_use]
        pub fn on(date: NaiveDate) -> Self {
            Self::new(date.and_time(NaiveTime::MIN).and_utc())
        }

        /// Move the clock to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2026-02-16 10:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2026-02-16T10:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Event bus wrapper that fails publishes on demand.
    ///
    /// Subscriptions are passed through untouched.
    pub struct FlakyEventBus {
        inner: Arc<dyn EventBus>,
        failures_left: AtomicU32,
        failed: AtomicU32,
    }

    impl FlakyEventBus {
        /// Wrap `inner`; no failure is scheduled.
        #[must_use]
        pub fn new(inner: Arc<dyn EventBus>) -> Self {
            Self {
                inner,
                failures_left: AtomicU32::new(0),
                failed: AtomicU32::new(0),
            }
        }

        /// Make the next `count` publishes fail with a transport error.
        pub fn fail_next_publishes(&self, count: u32) {
            self.failures_left.store(count, Ordering::SeqCst);
        }

        /// Number of publishes failed so far.
        #[must_use]
        pub fn failed_publishes(&self) -> u32 {
            self.failed.load(Ordering::SeqCst)
        }

        fn take_failure(&self) -> bool {
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        }
    }

    impl EventBus for FlakyEventBus {
        fn publish(
            &self,
            topic: &str,
            key: &str,
            event: &SerializedEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            if self.take_failure() {
                self.failed.fetch_add(1, Ordering::SeqCst);
                let topic = topic.to_string();
                return Box::pin(async move {
                    Err(EventBusError::TransportError(format!(
                        "injected publish failure on '{topic}'"
                    )))
                });
            }
            self.inner.publish(topic, key, event)
        }

        fn subscribe(
            &self,
            group: &str,
            topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
            self.inner.subscribe(group, topics)
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, FlakyEventBus, InMemoryEventBus, test_clock};
