//! HTTP server startup and shutdown.

use crate::middleware::propagate_correlation_id;
use axum::Router;
use axum::middleware::from_fn;
use std::future::Future;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Wrap `router` with the layers every service uses: correlation id and
/// request tracing.
#[must_use]
pub fn with_observability(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(from_fn(propagate_correlation_id))
            .layer(TraceLayer::new_for_http()),
    )
}

/// Bind `host:port`.
///
/// # Errors
///
/// Returns the I/O error if the address cannot be bound.
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind((host, port)).await
}

/// Serve `app` on `listener` until `shutdown` completes, then drain
/// in-flight requests.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = listener.local_addr()?;
    info!(%address, "HTTP server listening for requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
