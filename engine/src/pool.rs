//! Parallel execution of file tasks.
//!
//! Tasks are pushed into a shared queue and pulled by a fixed number of workers. A worker owns a
//! task from the moment it takes it off the queue until the task is terminal, and transfers its
//! chunks strictly in order. A failing task never stops its siblings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tracing::{Instrument, instrument};

use crate::error::TaskError;
use crate::gate::{Decision, Gate};
use crate::options::Settings;
use crate::progress::ProgressTracker;
use crate::task::TransferTask;

/// Warns once per run that the destination cannot apply attributes.
#[derive(Debug, Default)]
pub struct UnsupportedAttributes(AtomicBool);

impl UnsupportedAttributes {
    pub fn note(&self, path: &std::path::Path) {
        if !self.0.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "destination does not support setting attributes (first seen on {path:?}), \
                 attributes will not be preserved"
            );
        }
    }
}

/// Applies the source attributes to `path` on the destination.
///
/// Endpoints without attribute support downgrade this to a no-op.
pub async fn preserve_attributes(
    destination: &dyn fsclient::FilesystemClient,
    path: &std::path::Path,
    metadata: &fsclient::Metadata,
    unsupported: &UnsupportedAttributes,
) -> Result<(), TaskError> {
    match destination.set_attributes(path, metadata).await {
        Ok(()) => Ok(()),
        Err(error) if error.is_unsupported() => {
            unsupported.note(path);
            Ok(())
        }
        Err(error) => Err(TaskError::transfer_io(
            format!("failed setting attributes of {path:?}"),
            error,
        )),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

/// Everything a worker needs, shared by all workers of a run.
#[derive(Debug)]
pub struct WorkerPool {
    pub source: Arc<dyn fsclient::FilesystemClient>,
    pub destination: Arc<dyn fsclient::FilesystemClient>,
    pub settings: Settings,
    pub tracker: Arc<ProgressTracker>,
    pub cancel: tokio_util::sync::CancellationToken,
    pub unsupported_attributes: Arc<UnsupportedAttributes>,
}

impl WorkerPool {
    /// Runs every task to a terminal state and hands them all back.
    ///
    /// Tasks that are already terminal are returned as they are.
    pub async fn run(self: &Arc<Self>, tasks: Vec<TransferTask>) -> Vec<TransferTask> {
        let mut finished = Vec::with_capacity(tasks.len());
        let (sender, receiver) = async_channel::unbounded::<TransferTask>();
        for task in tasks {
            if task.state().is_terminal() {
                self.tracker.record_file_complete();
                finished.push(task);
                continue;
            }
            if let Err(error) = sender.send(task).await {
                finished.push(error.into_inner());
            }
        }
        sender.close();
        let queued = receiver.len();
        if queued == 0 {
            return finished;
        }
        let workers = self.settings.worker_count(queued);
        tracing::info!("starting {workers} workers for {queued} files");
        let mut join_set = tokio::task::JoinSet::new();
        for index in 0..workers {
            let pool = self.clone();
            let receiver = receiver.clone();
            join_set.spawn(async move { pool.worker(index, receiver).await }.in_current_span());
        }
        drop(receiver);
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(done) => finished.extend(done),
                Err(error) => tracing::error!("worker terminated unexpectedly: {error}"),
            }
        }
        finished
    }

    #[instrument(skip(self, receiver))]
    async fn worker(
        &self,
        index: usize,
        receiver: async_channel::Receiver<TransferTask>,
    ) -> Vec<TransferTask> {
        let mut done = Vec::new();
        while let Ok(mut task) = receiver.recv().await {
            // only catches anything when the embedding program unwinds on panic, the workspace
            // profiles abort
            let outcome = std::panic::AssertUnwindSafe(self.process(&mut task))
                .catch_unwind()
                .await;
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                tracing::error!("processing {:?} panicked: {message}", task.source.path);
                task.fail(TaskError::Panicked(message));
            }
            if let Some(error) = task.failure() {
                tracing::error!("failed copying {:?}: {error}", task.source.path);
            }
            self.tracker.record_file_complete();
            done.push(task);
        }
        done
    }

    #[instrument(skip(self, task), fields(src = ?task.source.path, dst = ?task.destination))]
    async fn process(&self, task: &mut TransferTask) {
        if self.cancel.is_cancelled() {
            task.fail(TaskError::Cancelled);
            return;
        }
        let gate = Gate {
            checksum: self.settings.checksum,
            overwrite: self.settings.overwrite,
        };
        match gate
            .decide(task, self.source.as_ref(), self.destination.as_ref())
            .await
        {
            Ok(Decision::Skip) => {
                task.skip();
                return;
            }
            Ok(Decision::Proceed) => {}
            Err(error) => {
                task.fail(error);
                return;
            }
        }
        task.start();
        if let Err(error) = self.copy_chunks(task).await {
            task.fail(error);
            return;
        }
        if self.settings.preserve_attributes
            && let Err(error) = preserve_attributes(
                self.destination.as_ref(),
                &task.destination,
                &task.source.metadata,
                &self.unsupported_attributes,
            )
            .await
        {
            task.fail(error);
            return;
        }
        tracing::debug!("copied {} bytes", task.bytes_transferred());
        task.complete();
    }

    async fn copy_chunks(&self, task: &mut TransferTask) -> Result<(), TaskError> {
        for index in 0..task.chunks.len() {
            let chunk = task.chunks[index];
            let source_path = &task.source.path;
            let destination_path = &task.destination;
            let transfer = async {
                let data = self
                    .source
                    .read_range(source_path, chunk.offset, chunk.length)
                    .await
                    .map_err(|error| {
                        if error.is_not_found() {
                            return TaskError::PathNotFound(source_path.clone());
                        }
                        TaskError::transfer_io(
                            format!("failed reading {source_path:?} at offset {}", chunk.offset),
                            error,
                        )
                    })?;
                if data.len() as u64 != chunk.length {
                    return Err(TaskError::transfer_io(
                        format!("short read of {source_path:?} at offset {}", chunk.offset),
                        fsclient::ClientError::Other(anyhow::anyhow!(
                            "expected {} bytes, got {}, source changed during the copy?",
                            chunk.length,
                            data.len()
                        )),
                    ));
                }
                self.destination
                    .write_range(destination_path, chunk.offset, data, index == 0)
                    .await
                    .map_err(|error| {
                        TaskError::transfer_io(
                            format!(
                                "failed writing {destination_path:?} at offset {}",
                                chunk.offset
                            ),
                            error,
                        )
                    })
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                result = transfer => result?,
            }
            tracing::trace!("chunk {index} ({} bytes) done", chunk.length);
            task.add_bytes(chunk.length);
            self.tracker.record(chunk.length);
        }
        Ok(())
    }
}
