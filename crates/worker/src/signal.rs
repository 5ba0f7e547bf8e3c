use tokio::task::JoinHandle;

use crate::daemon::DaemonHandle;

/// Resolve on SIGINT (Ctrl-C) or, on unix, SIGTERM.
///
/// If a handler cannot be installed the corresponding branch never
/// resolves; the other one still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Shut the daemon down on the first termination signal.
pub fn spawn_signal_listener(handle: DaemonHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.shutdown();
    })
}
