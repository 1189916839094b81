use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use crate::core::shutdown;
use crate::core::state::AppState;
use crate::tasks::grading;

pub async fn run(state: AppState) -> Result<()> {
    let concurrency = state.settings().worker().concurrency;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(concurrency + 1);
    for worker_id in 0..concurrency {
        handles.push(tokio::spawn(grading_worker(state.clone(), worker_id, shutdown_rx.clone())));
    }
    handles.push(tokio::spawn(recover_stale_loop(state.clone(), shutdown_rx.clone())));

    tracing::info!(
        workers = concurrency,
        environment = state.settings().runtime().environment.as_str(),
        "Grading workers started"
    );

    shutdown::wait_and_broadcast(&shutdown_tx).await;

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

/// Claims and runs jobs back to back; sleeps only when the queue is empty.
async fn grading_worker(state: AppState, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
    let poll_interval = Duration::from_secs(state.settings().worker().poll_interval_seconds);

    loop {
        if *shutdown.borrow() {
            break;
        }

        match state.pipeline().process_next().await {
            Ok(Some(outcome)) => {
                tracing::debug!(
                    worker_id,
                    job_id = %outcome.job_id,
                    status = outcome.status.as_str(),
                    "Worker finished job"
                );
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(worker_id, error = %err, "Failed to claim grading job"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(poll_interval) => {}
        }
    }
}

async fn recover_stale_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let stale_after = state.settings().stale_processing_after();
    let mut tick =
        interval(Duration::from_secs(state.settings().worker().stale_recovery_interval_seconds));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = grading::recover_stale_processing_jobs(
                    state.jobs().as_ref(),
                    state.files().as_ref(),
                    stale_after,
                )
                .await
                {
                    tracing::error!(error = %err, "recover_stale_processing_jobs failed");
                }
            }
        }
    }
}
