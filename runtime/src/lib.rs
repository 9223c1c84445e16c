//! # Age Saga Runtime
//!
//! Runtime pieces shared by the saga services:
//!
//! - **Publisher**: typed publish with retry ([`publisher::EventPublisher`])
//! - **Consumer**: poll-process-acknowledge loop and worker pool
//!   ([`consumer::EventConsumer`], [`consumer::ConsumerPool`])
//! - **Handler**: the seam a service implements ([`handler::EventHandler`])
//! - **Observability**: Prometheus metrics and tracing setup
//! - **Lifecycle**: shutdown signal and task teardown
//! - **Config**: typed environment lookup ([`config::Settings`])
//!
//! ## Example
//!
//! ```ignore
//! use age_saga_runtime::{consumer::EventConsumer, publisher::EventPublisher, retry::RetryPolicy};
//!
//! let publisher = EventPublisher::new(event_bus.clone(), RetryPolicy::default());
//! let handles = EventConsumer::builder()
//!     .group("age-service")
//!     .topics(vec!["person-created-topic".to_string()])
//!     .event_bus(event_bus)
//!     .handler(handler)
//!     .shutdown(shutdown_rx)
//!     .build_pool(4)?
//!     .spawn();
//! ```

/// Environment-driven settings
pub mod config;

/// Poll-process-acknowledge consumer loop
pub mod consumer;

/// Event handler seam
pub mod handler;

/// Shutdown signal and task teardown
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Typed publishing with retries
pub mod publisher;

/// Retry logic with exponential backoff
pub mod retry;

/// Tracing subscriber setup
pub mod telemetry;

pub use consumer::{ConsumerError, ConsumerPool, EventConsumer};
pub use handler::{Disposition, EventHandler};
pub use publisher::{EventPublisher, PublishError};
pub use retry::RetryPolicy;
