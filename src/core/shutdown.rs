use tokio::signal;
use tokio::sync::watch;

/// Waits for Ctrl+C or SIGTERM, then tells every worker loop to stop
/// claiming. Jobs already claimed still run to a terminal state.
pub async fn wait_and_broadcast(workers: &watch::Sender<bool>) -> &'static str {
    let received = tokio::select! {
        name = interrupt() => name,
        name = terminate() => name,
    };

    tracing::info!(signal = received, "Shutdown requested, draining grading workers");
    if workers.send(true).is_err() {
        tracing::warn!("No worker loops left to notify");
    }
    received
}

async fn interrupt() -> &'static str {
    match signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(err) => {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn terminate() -> &'static str {
    use signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
            "SIGTERM"
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to listen for SIGTERM");
            std::future::pending().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() -> &'static str {
    std::future::pending().await
}
