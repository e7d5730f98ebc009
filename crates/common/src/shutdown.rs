//! Process shutdown signal handling shared by both executables.

/// Waits for a shutdown signal and logs which one arrived.
///
/// Resolves on SIGINT or, on Unix, SIGTERM; both binaries race this
/// against their main loop to begin graceful shutdown.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        signal.recv().await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    };
    tracing::info!(signal = received, "shutdown signal received, starting graceful shutdown");
}
