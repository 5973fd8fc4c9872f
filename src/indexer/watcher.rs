//! File watcher — debounced filesystem events feeding single-file re-index
//! tasks into the indexer service.

use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode, DebounceEventResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::discovery;

/// Task for the indexer worker.
#[derive(Debug, Clone)]
pub enum IndexTask {
    Reindex(PathBuf),
    Delete(PathBuf),
}

/// Start the watcher loop. Blocks until cancelled; run it on its own task.
pub async fn start_watcher(
    root_path: PathBuf,
    task_tx: mpsc::Sender<IndexTask>,
    extra_ignores: Vec<String>,
    cancel: CancellationToken,
) {
    let ignore_stack = discovery::build_ignore_stack(&root_path, &extra_ignores);

    let (tx, rx) = channel::<DebounceEventResult>();
    let mut debouncer = match new_debouncer(Duration::from_millis(500), tx) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("failed to create file watcher: {}", e);
            return;
        }
    };

    if let Err(e) = debouncer
        .watcher()
        .watch(&root_path, RecursiveMode::Recursive)
    {
        tracing::error!("failed to watch {:?}: {}", root_path, e);
        return;
    }

    tracing::info!("file watcher started for {:?}", root_path);

    loop {
        // recv_timeout so cancellation is observed between event bursts
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(Ok(events)) => {
                for event in events {
                    let path = event.path;

                    if ignore_stack
                        .matched_path_or_any_parents(&path, path.is_dir())
                        .is_ignore()
                    {
                        continue;
                    }
                    if !discovery::is_indexable(&path) {
                        continue;
                    }

                    let task = if path.exists() {
                        IndexTask::Reindex(path)
                    } else {
                        IndexTask::Delete(path)
                    };
                    tracing::debug!("file event: {:?}", task);

                    if task_tx.send(task).await.is_err() {
                        tracing::warn!("indexer channel closed, watcher exiting");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::error!("watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::info!("watcher channel closed");
                break;
            }
        }

        if cancel.is_cancelled() {
            tracing::info!("watcher stopped for {:?}", root_path);
            break;
        }
    }
}
