//! Process lifecycle: shutdown signal and orderly task teardown.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a signal handler cannot be installed the failure is logged and that
/// signal is ignored.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Wait for background tasks to finish, giving each one `timeout`.
pub async fn await_shutdown(handles: Vec<JoinHandle<()>>, timeout: Duration) {
    for (idx, handle) in handles.into_iter().enumerate() {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(task = idx, "Background task stopped gracefully"),
            Ok(Err(e)) => warn!(task = idx, error = %e, "Background task failed"),
            Err(_) => warn!(task = idx, "Background task shutdown timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn await_shutdown_tolerates_stuck_tasks() {
        let finished = tokio::spawn(async {});
        let stuck = tokio::spawn(std::future::pending::<()>());

        let started = std::time::Instant::now();
        await_shutdown(vec![finished, stuck], Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
