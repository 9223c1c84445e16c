//! Age service binary.

use age_saga_runtime::metrics::MetricsExporter;
use age_saga_runtime::telemetry::init_tracing;
use age_service::{Application, Config};
use anyhow::Context;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("age_service=info,age_saga_runtime=info,tower_http=info");

    let exporter = MetricsExporter::install().context("installing metrics exporter")?;
    let config = Config::from_env();
    info!(
        port = config.server.port,
        topic = %config.bus.person_created_topic,
        group = %config.bus.consumer_group,
        "Starting age service"
    );

    Application::build(config, exporter).await?.run().await
}
