//! Registry service binary.

use age_saga_runtime::metrics::MetricsExporter;
use age_saga_runtime::telemetry::init_tracing;
use anyhow::Context;
use registry_service::{Application, Config};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("registry_service=info,age_saga_runtime=info,tower_http=info");

    let exporter = MetricsExporter::install().context("installing metrics exporter")?;
    let config = Config::from_env();
    info!(
        port = config.server.port,
        topic = %config.bus.age_computed_topic,
        group = %config.bus.consumer_group,
        republish = config.sweep.is_some(),
        "Starting registry service"
    );

    Application::build(config, exporter).await?.run().await
}
