//! Process signal handling.
//!
//! Ctrl+C or SIGTERM (unix) asks the running session to close with a normal
//! Close frame instead of dropping the socket.

use tokio::signal;
use tokio::sync::broadcast;

/// Resolve once Ctrl+C or SIGTERM is received
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, closing connection");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, closing connection");
        }
    }
}

/// Wait for a process signal, then forward it to the session
pub async fn forward_signal(shutdown_tx: broadcast::Sender<()>) {
    wait_for_signal().await;
    let _ = shutdown_tx.send(());
}
