//! Application assembly and lifecycle.
//!
//! [`Application::build`] wires storage, the event bus, the `AgeComputed`
//! consumer pool, the optional republish sweep and the HTTP router.
//! [`Application::run`] serves until Ctrl+C or SIGTERM, then stops the
//! background tasks and waits for them.

use crate::config::{BusConfig, Config};
use crate::http::{AppState, build_router};
use crate::postgres::PostgresPersonStore;
use crate::reconciler::AgeComputedHandler;
use crate::service::{RegistryService, SOURCE, SweepConfig, spawn_republish_sweep};
use crate::store::{InMemoryPersonStore, PersonStore};
use age_saga_core::environment::{Clock, SystemClock};
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

/// A fully wired registry service, ready to run.
pub struct Application {
    listener: TcpListener,
    router: Router,
    consumers: ConsumerPool,
    registry: RegistryService,
    sweep: Option<SweepConfig>,
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
        let store = person_store(config.database.as_ref()).await?;
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
        store: Arc<dyn PersonStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> anyhow::Result<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let registry = RegistryService::new(
            Arc::clone(&store),
            EventPublisher::new(Arc::clone(&event_bus), config.publish_retry.clone()),
            Arc::clone(&clock),
            config.bus.person_created_topic.clone(),
        );
        let consumers = EventConsumer::builder()
            .name("age-computed")
            .group(config.bus.consumer_group.clone())
            .topics(vec![config.bus.age_computed_topic.clone()])
            .event_bus(event_bus)
            .handler(Arc::new(AgeComputedHandler::new(store, clock)))
            .shutdown(shutdown_rx)
            .redelivery_delay(config.redelivery_delay)
            .build_pool(config.consumer_workers)?;

        let router = build_router(
            AppState {
                registry: registry.clone(),
            },
            exporter,
        );
        let listener = server::bind(&config.server.host, config.server.port)
            .await
            .with_context(|| {
                format!("binding {}:{}", config.server.host, config.server.port)
            })?;

        Ok(Self {
            listener,
            router,
            consumers,
            registry,
            sweep: config.sweep,
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
        info!(workers = self.consumers.len(), "Starting AgeComputed consumers");
        let mut handles = self.consumers.spawn();
        if let Some(sweep) = self.sweep {
            handles.push(spawn_republish_sweep(
                self.registry,
                sweep,
                self.shutdown_tx.subscribe(),
            ));
        }

        let served = server::serve(self.listener, self.router, shutdown).await;

        info!("Stopping background tasks");
        let _ = self.shutdown_tx.send(());
        await_shutdown(handles, self.shutdown_timeout).await;

        served.context("HTTP server failed")?;
        info!("Registry service stopped");
        Ok(())
    }
}

async fn person_store(config: Option<&PostgresConfig>) -> anyhow::Result<Arc<dyn PersonStore>> {
    let Some(config) = config else {
        warn!("DATABASE_URL not set, persons are kept in memory");
        return Ok(Arc::new(InMemoryPersonStore::new()));
    };

    let pool = age_saga_postgres::connect(config)
        .await
        .context("connecting to the registry database")?;
    let store = PostgresPersonStore::new(pool);
    store
        .migrate()
        .await
        .context("migrating the registry database")?;
    info!("Persons stored in PostgreSQL");
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
