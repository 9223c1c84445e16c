//! Registry service configuration.
//!
//! Loaded from environment variables with defaults:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `REGISTRY_HOST` | `0.0.0.0` |
//! | `REGISTRY_PORT` | `8080` |
//! | `DATABASE_URL` | unset: in-memory store |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `KAFKA_BROKERS` | unset: in-process bus |
//! | `PERSON_CREATED_TOPIC` | `person-created-topic` |
//! | `AGE_COMPUTED_TOPIC` | `age-calculated-topic` |
//! | `REGISTRY_CONSUMER_GROUP` | `registry-service` |
//! | `CONSUMER_WORKERS` | `4` |
//! | `PUBLISH_MAX_RETRIES` | `3` |
//! | `PUBLISH_INITIAL_DELAY_MS` | `100` |
//! | `REDELIVERY_DELAY_MS` | `500` |
//! | `REPUBLISH_INTERVAL_SECS` | `0` (sweep disabled) |
//! | `REPUBLISH_AFTER_SECS` | `300` |
//! | `REPUBLISH_BATCH_SIZE` | `100` |
//! | `SHUTDOWN_TIMEOUT_SECS` | `10` |

use crate::service::SweepConfig;
use age_saga_contracts::topics;
use age_saga_postgres::PostgresConfig;
use age_saga_runtime::RetryPolicy;
use age_saga_runtime::config::Settings;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// HTTP server
    pub server: ServerConfig,
    /// Database; `None` keeps persons in memory
    pub database: Option<PostgresConfig>,
    /// Event bus
    pub bus: BusConfig,
    /// Workers consuming `AgeComputed`
    pub consumer_workers: usize,
    /// Wait before a rejected delivery is handed back
    pub redelivery_delay: Duration,
    /// Retry policy for `PersonCreated` publishes
    pub publish_retry: RetryPolicy,
    /// Republish sweep; `None` when disabled
    pub sweep: Option<SweepConfig>,
    /// Grace period for background tasks on shutdown
    pub shutdown_timeout: Duration,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Kafka bootstrap servers; `None` uses the in-process bus
    pub brokers: Option<String>,
    /// Topic `PersonCreated` is published to
    pub person_created_topic: String,
    /// Topic consumed
    pub age_computed_topic: String,
    /// Consumer group
    pub consumer_group: String,
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_settings(&Settings::from_env())
    }

    /// Load configuration through `settings`.
    pub fn from_settings<F>(settings: &Settings<F>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let republish_interval = settings.secs("REPUBLISH_INTERVAL_SECS", 0);

        Self {
            server: ServerConfig {
                host: settings.string("REGISTRY_HOST", "0.0.0.0"),
                port: settings.parsed("REGISTRY_PORT", 8080),
            },
            database: settings.optional("DATABASE_URL").map(|url| {
                PostgresConfig::new(url)
                    .with_max_connections(settings.parsed("DATABASE_MAX_CONNECTIONS", 10))
            }),
            bus: BusConfig {
                brokers: settings.optional("KAFKA_BROKERS"),
                person_created_topic: settings
                    .string("PERSON_CREATED_TOPIC", topics::PERSON_CREATED),
                age_computed_topic: settings.string("AGE_COMPUTED_TOPIC", topics::AGE_COMPUTED),
                consumer_group: settings
                    .string("REGISTRY_CONSUMER_GROUP", topics::REGISTRY_SERVICE_GROUP),
            },
            consumer_workers: settings.parsed("CONSUMER_WORKERS", 4usize).max(1),
            redelivery_delay: settings.millis("REDELIVERY_DELAY_MS", 500),
            publish_retry: RetryPolicy::builder()
                .max_retries(settings.parsed("PUBLISH_MAX_RETRIES", 3))
                .initial_delay(settings.millis("PUBLISH_INITIAL_DELAY_MS", 100))
                .build(),
            sweep: (!republish_interval.is_zero()).then(|| SweepConfig {
                interval: republish_interval,
                older_than: settings.secs("REPUBLISH_AFTER_SECS", 300),
                batch_size: settings.parsed("REPUBLISH_BATCH_SIZE", 100u32).max(1),
            }),
            shutdown_timeout: settings.secs("SHUTDOWN_TIMEOUT_SECS", 10),
        }
    }
}
