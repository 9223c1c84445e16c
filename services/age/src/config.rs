//! Age service configuration.
//!
//! Loaded from environment variables with defaults:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `AGE_HOST` | `0.0.0.0` |
//! | `AGE_PORT` | `8081` |
//! | `DATABASE_URL` | unset: in-memory store |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `KAFKA_BROKERS` | unset: in-process bus |
//! | `PERSON_CREATED_TOPIC` | `person-created-topic` |
//! | `AGE_COMPUTED_TOPIC` | `age-calculated-topic` |
//! | `AGE_CONSUMER_GROUP` | `age-service` |
//! | `CONSUMER_WORKERS` | `4` |
//! | `MAX_DELIVERY_ATTEMPTS` | `5` |
//! | `PUBLISH_MAX_RETRIES` | `3` |
//! | `PUBLISH_INITIAL_DELAY_MS` | `100` |
//! | `REDELIVERY_DELAY_MS` | `500` |
//! | `SHUTDOWN_TIMEOUT_SECS` | `10` |

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
    /// Database; `None` keeps derived ages in memory
    pub database: Option<PostgresConfig>,
    /// Event bus
    pub bus: BusConfig,
    /// `PersonCreated` consumer
    pub consumer: ConsumerConfig,
    /// Retry policy for outcome publishes
    pub publish_retry: RetryPolicy,
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
    /// Topic consumed
    pub person_created_topic: String,
    /// Topic outcomes are published to
    pub age_computed_topic: String,
    /// Consumer group
    pub consumer_group: String,
}

/// Consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Workers in the consumer group
    pub workers: usize,
    /// Delivery attempts before a storage outage is reported as FAILED
    pub max_delivery_attempts: u32,
    /// Wait before a rejected delivery is handed back
    pub redelivery_delay: Duration,
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
        Self {
            server: ServerConfig {
                host: settings.string("AGE_HOST", "0.0.0.0"),
                port: settings.parsed("AGE_PORT", 8081),
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
                    .string("AGE_CONSUMER_GROUP", topics::AGE_SERVICE_GROUP),
            },
            consumer: ConsumerConfig {
                workers: settings.parsed("CONSUMER_WORKERS", 4usize).max(1),
                max_delivery_attempts: settings.parsed("MAX_DELIVERY_ATTEMPTS", 5u32).max(1),
                redelivery_delay: settings.millis("REDELIVERY_DELAY_MS", 500),
            },
            publish_retry: RetryPolicy::builder()
                .max_retries(settings.parsed("PUBLISH_MAX_RETRIES", 3))
                .initial_delay(settings.millis("PUBLISH_INITIAL_DELAY_MS", 100))
                .build(),
            shutdown_timeout: settings.secs("SHUTDOWN_TIMEOUT_SECS", 10),
        }
    }
}
