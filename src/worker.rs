//! Background queue worker
//!
//! Drains the queue one job at a time: claim, clean the stored upload into
//! the cleaned directory under the same name, record the outcome. Failed
//! jobs are not retried.

use std::time::Duration;

use crate::db::{QueueItem, QueueRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Process the oldest queued job, if any. Returns the job in its final state.
pub async fn process_next(state: &AppState) -> Result<Option<QueueItem>> {
    let repo = QueueRepository::new(state.db());
    let Some(item) = repo.claim_next().await? else {
        return Ok(None);
    };

    tracing::info!(queue_id = item.id, "Processing {}", item.name);

    let source = state.config().storage.upload_dir.join(&item.name);
    let destination = state.config().storage.cleaned_dir.join(&item.name);

    // The pipeline does blocking file I/O
    let task_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        task_state
            .pipeline()
            .clean(&source, &destination)
            .map_err(|e| e.to_string())
    })
    .await
    .unwrap_or_else(|e| Err(format!("Cleaning task failed: {}", e)));

    match outcome {
        Ok(path) => {
            tracing::info!(queue_id = item.id, "Cleaned into {}", path.display());
            repo.mark_done(item.id).await?;
        }
        Err(message) => {
            tracing::error!(queue_id = item.id, "Failed to clean {}: {}", item.name, message);
            repo.mark_failed(item.id, &message).await?;
        }
    }

    repo.get(item.id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Queue item vanished: {}", item.id)))
        .map(Some)
}

/// Return jobs stranded `In Progress` by a crash or abort to the queue.
/// Only safe before this process starts claiming.
pub async fn recover_interrupted(state: &AppState) -> Result<u64> {
    QueueRepository::new(state.db()).requeue_in_progress().await
}

/// Poll the queue until the task is dropped
pub async fn run(state: AppState) {
    let interval = Duration::from_millis(state.config().worker.poll_interval_ms);
    tracing::info!("Queue worker started (poll interval {:?})", interval);

    match recover_interrupted(&state).await {
        Ok(0) => {}
        Ok(count) => tracing::warn!("Requeued {} job(s) left In Progress by a previous run", count),
        Err(e) => tracing::error!("Failed to requeue interrupted jobs: {}", e),
    }

    loop {
        match process_next(&state).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => tracing::error!("Queue worker error: {}", e),
        }
        tokio::time::sleep(interval).await;
    }
}
