//! Prometheus metrics for the saga services.
//!
//! Metrics are recorded through the `metrics` facade and rendered by a
//! process-wide Prometheus recorder. Each service exposes the rendered text on
//! its own `GET /metrics` route.
//!
//! # Example
//!
//! ```rust,no_run
//! use age_saga_runtime::metrics::{MetricsExporter, SagaMetrics};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = MetricsExporter::install()?;
//! SagaMetrics::record_person_created();
//! println!("{}", exporter.render());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in the services
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Handle on the process-wide Prometheus recorder.
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

impl MetricsExporter {
    /// Install the Prometheus recorder, or reuse it if this process already did.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or another recorder
    /// (not installed through this function) already owns the facade.
    pub fn install() -> Result<Self, MetricsError> {
        let mut installed = HANDLE
            .lock()
            .map_err(|_| MetricsError::Install("metrics handle lock poisoned".to_string()))?;

        if let Some(handle) = installed.as_ref() {
            return Ok(Self {
                handle: handle.clone(),
            });
        }

        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = builder
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        *installed = Some(handle.clone());
        tracing::info!("Prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Consumer metrics
    describe_counter!(
        "saga_deliveries_total",
        "Deliveries handled, by consumer and disposition (ack, redeliver)"
    );
    describe_histogram!(
        "saga_delivery_duration_seconds",
        "Time taken to handle one delivery"
    );
    describe_counter!(
        "saga_poison_messages_total",
        "Deliveries acknowledged without processing because they cannot be decoded"
    );
    describe_counter!(
        "saga_consumer_stream_errors_total",
        "Errors received from the bus subscription stream"
    );

    // Publisher metrics
    describe_counter!(
        "saga_events_published_total",
        "Events accepted by the bus, by topic"
    );
    describe_counter!(
        "saga_publish_failures_total",
        "Publishes that failed after all retries, by topic"
    );
    describe_histogram!(
        "saga_publish_duration_seconds",
        "Time taken to publish an event including retries"
    );

    describe_counter!(
        "saga_store_errors_total",
        "Database errors, by kind (unavailable, rejected, corrupt)"
    );

    // Saga metrics
    describe_counter!("saga_persons_created_total", "Person records created");
    describe_counter!(
        "saga_age_outcomes_total",
        "Age computation outcomes reported, by status (DONE, FAILED)"
    );
    describe_counter!(
        "saga_reconciliations_total",
        "AgeComputed events applied by the registry, by result"
    );
    describe_counter!(
        "saga_republished_total",
        "PersonCreated events republished for persons stuck in PENDING"
    );
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record one handled delivery.
    pub fn record_delivery(consumer: &str, disposition: &'static str, duration: Duration) {
        counter!(
            "saga_deliveries_total",
            "consumer" => consumer.to_owned(),
            "disposition" => disposition
        )
        .increment(1);
        histogram!("saga_delivery_duration_seconds", "consumer" => consumer.to_owned())
            .record(duration.as_secs_f64());
    }

    /// Record a poison message.
    pub fn record_poison(consumer: &str) {
        counter!("saga_poison_messages_total", "consumer" => consumer.to_owned()).increment(1);
    }

    /// Record an error item from the subscription stream.
    pub fn record_stream_error(consumer: &str) {
        counter!("saga_consumer_stream_errors_total", "consumer" => consumer.to_owned())
            .increment(1);
    }
}

/// Publisher metrics recorder.
pub struct PublisherMetrics;

impl PublisherMetrics {
    /// Record a successful publish.
    pub fn record_publish(topic: &str, duration: Duration) {
        counter!("saga_events_published_total", "topic" => topic.to_owned()).increment(1);
        histogram!("saga_publish_duration_seconds", "topic" => topic.to_owned())
            .record(duration.as_secs_f64());
    }

    /// Record a publish that failed for good.
    pub fn record_failure(topic: &str) {
        counter!("saga_publish_failures_total", "topic" => topic.to_owned()).increment(1);
    }
}

/// Business-level saga metrics recorder.
pub struct SagaMetrics;

impl SagaMetrics {
    /// Record a person creation.
    pub fn record_person_created() {
        counter!("saga_persons_created_total").increment(1);
    }

    /// Record an age outcome published by the age service.
    pub fn record_age_outcome(status: &'static str) {
        counter!("saga_age_outcomes_total", "status" => status).increment(1);
    }

    /// Record how the registry handled an `AgeComputed` event.
    pub fn record_reconciliation(result: &'static str) {
        counter!("saga_reconciliations_total", "result" => result).increment(1);
    }

    /// Record republished `PersonCreated` events.
    pub fn record_republished(count: u64) {
        counter!("saga_republished_total").increment(count);
    }
}
