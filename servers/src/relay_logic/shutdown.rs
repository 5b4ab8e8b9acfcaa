use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Resolves on Ctrl+C, SIGTERM or when `token` is cancelled elsewhere, and
/// cancels `token` so every background task sees the shutdown.
pub async fn shutdown_signal(token: CancellationToken) {
    // Handler for CTRL+C
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    // Handler for SIGTERM (on UNIX systems)
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => tracing::info!("SIGTERM received, initiating shutdown."),
        _ = token.cancelled() => {}
    }
    token.cancel();
}
