use anyhow::Result;
use tokio::signal;

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn wait_for_shutdown() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        term.recv().await;
        Ok::<(), std::io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    let which = tokio::select! {
        res = ctrl_c => res.map(|_| "ctrl-c"),
        res = terminate => res.map(|_| "SIGTERM"),
    };
    match which {
        Ok(source) => {
            tracing::info!(source, "shutdown signal received");
            Ok(())
        }
        Err(e) => {
            tracing::error!(%e, "failed to listen for shutdown signals");
            Err(e.into())
        }
    }
}
