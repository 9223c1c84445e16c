//! Application assembly and lifecycle.
//!
//! [`Application::build`] wires storage, the event bus, the `PersonCreated`
//! consumer pool and the HTTP router from a [`Config`].
//! [`Application::run`] serves until Ctrl+C or SIGTERM, then stops the
//! consumers and waits for them to finish their current delivery.

use crate::config::{BusConfig, Config};
use crate::http::{AppState, build_router};
use crate::postgres::PostgresDerivedAgeStore;
use crate::processor::{PersonCreatedHandler, SOURCE};
use crate::store::{DerivedAgeStore, InMemoryDerivedAgeStore};
use age_saga_core::environment::SystemClock;
use age_saga_core::event_bus::EventBus;
use age_saga_postgres::PostgresConfig;
use age_saga_runtime::lifecycle::{await_shutdown, shutdown_signal};
use age_saga_runtime::metrics::MetricsExporter;
use age_saga_runtime::{ConsumerPool, EventConsumer, EventPublisher};
use age_saga_testing::InMemoryEventBus;
use age_saga_web::server;
use anyhow::Context;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A fully wired age service, ready to run.
pub struct Application {
    listener: TcpListener,
    router: Router,
    consumers: ConsumerPool,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Wire the service described by `config`.
    ///
    /// # Errors
    ///
    /// Fails when the database, the bus or the listen address is unusable.
    pub async fn build(config: Config, exporter: MetricsExporter) -> anyhow::Result<Self> {
        let store = derived_age_store(config.database.as_ref()).await?;
        let event_bus = event_bus(&config.bus)?;
        Self::with_parts(config, exporter, store, event_bus).await
    }

    /// Wire the service around an existing store and bus.
    ///
    /// # Errors
    ///
    /// Fails when the listen address cannot be bound.
    pub async fn with_parts(
        config: Config,
        exporter: MetricsExporter,
        store: Arc<dyn DerivedAgeStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> anyhow::Result<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);

        let handler = PersonCreatedHandler::new(
            Arc::clone(&store),
            EventPublisher::new(Arc::clone(&event_bus), config.publish_retry.clone()),
            Arc::new(SystemClock),
            config.bus.age_computed_topic.clone(),
            config.consumer.max_delivery_attempts,
        );
        let consumers = EventConsumer::builder()
            .name("person-created")
            .group(config.bus.consumer_group.clone())
            .topics(vec![config.bus.person_created_topic.clone()])
            .event_bus(event_bus)
            .handler(Arc::new(handler))
            .shutdown(shutdown_rx)
            .redelivery_delay(config.consumer.redelivery_delay)
            .build_pool(config.consumer.workers)?;

        let router = build_router(AppState { store }, exporter);
        let listener = server::bind(&config.server.host, config.server.port)
            .await
            .with_context(|| {
                format!("binding {}:{}", config.server.host, config.server.port)
            })?;

        Ok(Self {
            listener,
            router,
            consumers,
            shutdown_tx,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Address the HTTP server is bound to.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the socket.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the HTTP server.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the HTTP server.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(workers = self.consumers.len(), "Starting PersonCreated consumers");
        let handles = self.consumers.spawn();

        let served = server::serve(self.listener, self.router, shutdown).await;

        info!("Stopping consumers");
        let _ = self.shutdown_tx.send(());
        await_shutdown(handles, self.shutdown_timeout).await;

        served.context("HTTP server failed")?;
        info!("Age service stopped");
        Ok(())
    }
}

async fn derived_age_store(
    config: Option<&PostgresConfig>,
) -> anyhow::Result<Arc<dyn DerivedAgeStore>> {
    let Some(config) = config else {
        warn!("DATABASE_URL not set, derived ages are kept in memory");
        return Ok(Arc::new(InMemoryDerivedAgeStore::new()));
    };

    let pool = age_saga_postgres::connect(config)
        .await
        .context("connecting to the age database")?;
    let store = PostgresDerivedAgeStore::new(pool);
    store.migrate().await.context("migrating the age database")?;
    info!("Derived ages stored in PostgreSQL");
    Ok(Arc::new(store))
}

fn event_bus(config: &BusConfig) -> anyhow::Result<Arc<dyn EventBus>> {
    match config.brokers.as_deref() {
        Some(brokers) => kafka_event_bus(brokers),
        None => {
            warn!("KAFKA_BROKERS not set, using the in-process event bus");
            Ok(Arc::new(InMemoryEventBus::new()))
        }
    }
}

#[cfg(feature = "kafka")]
fn kafka_event_bus(brokers: &str) -> anyhow::Result<Arc<dyn EventBus>> {
    let bus = age_saga_redpanda::RedpandaEventBus::builder()
        .brokers(brokers)
        .client_id(SOURCE)
        .build()
        .context("connecting to Kafka")?;
    info!(brokers, "Using Kafka event bus");
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "kafka"))]
fn kafka_event_bus(brokers: &str) -> anyhow::Result<Arc<dyn EventBus>> {
    anyhow::bail!("KAFKA_BROKERS is {brokers} but {SOURCE} was built without the `kafka` feature")
}
