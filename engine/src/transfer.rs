//! One run of the engine, from options validation to the final report.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use tracing::instrument;

use crate::error::{Error, TaskError};
use crate::options::{Options, Settings};
use crate::plan::{DirectoryTask, Planner};
use crate::pool::{UnsupportedAttributes, WorkerPool, preserve_attributes};
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::report::CopyReport;
use crate::task::TransferTask;

/// Which kind of storage an endpoint is backed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    Remote,
    Local,
}

/// One side of a transfer.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub client: Arc<dyn fsclient::FilesystemClient>,
}

impl Endpoint {
    pub fn remote(client: Arc<dyn fsclient::FilesystemClient>) -> Self {
        Self {
            kind: EndpointKind::Remote,
            client,
        }
    }

    pub fn local() -> Self {
        Self {
            kind: EndpointKind::Local,
            client: Arc::new(fsclient::LocalClient::new()),
        }
    }
}

/// Creates a directory unless it already exists; returns whether it was created.
async fn ensure_directory(
    client: &dyn fsclient::FilesystemClient,
    path: &Path,
) -> Result<bool, fsclient::ClientError> {
    match client.status(path).await {
        Ok(entry) if entry.is_dir => return Ok(false),
        Ok(_) => {}
        Err(error) if error.is_not_found() => {}
        Err(error) => return Err(error),
    }
    client.mkdirs(path).await?;
    Ok(true)
}

/// Creates the planned destination directories and returns how many were created and which failed.
///
/// Directories are created one depth level at a time so that a parent always exists, or has
/// failed, before any of its children is looked at.
async fn create_directories(
    client: &Arc<dyn fsclient::FilesystemClient>,
    directories: &[DirectoryTask],
    parallelism: usize,
) -> (usize, HashSet<PathBuf>) {
    let mut levels: BTreeMap<usize, Vec<&DirectoryTask>> = BTreeMap::new();
    for directory in directories {
        levels
            .entry(directory.destination.components().count())
            .or_default()
            .push(directory);
    }
    let mut created = 0;
    let mut failed = HashSet::new();
    for level in levels.into_values() {
        let mut pending = Vec::new();
        for directory in level {
            if has_failed_ancestor(&directory.destination, &failed).is_some() {
                failed.insert(directory.destination.clone());
            } else {
                pending.push(directory);
            }
        }
        let results: Vec<_> = futures::stream::iter(pending)
            .map(|directory| async move {
                let result = ensure_directory(client.as_ref(), &directory.destination).await;
                (directory, result)
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;
        for (directory, result) in results {
            match result {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(
                        "failed creating directory {:?}: {error}",
                        directory.destination
                    );
                    failed.insert(directory.destination.clone());
                }
            }
        }
    }
    (created, failed)
}

fn has_failed_ancestor(path: &Path, failed_directories: &HashSet<PathBuf>) -> Option<PathBuf> {
    path.ancestors()
        .skip(1)
        .find(|ancestor| failed_directories.contains(*ancestor))
        .map(Path::to_path_buf)
}

/// Fails every task whose destination lies beneath a directory that could not be created.
fn fail_orphans(tasks: &mut [TransferTask], failed_directories: &HashSet<PathBuf>) {
    if failed_directories.is_empty() {
        return;
    }
    for task in tasks {
        if let Some(directory) = has_failed_ancestor(&task.destination, failed_directories) {
            task.fail(TaskError::ParentDirectory(directory));
        }
    }
}

/// Applies directory attributes deepest first, once all files are written.
async fn preserve_directory_attributes(
    client: &dyn fsclient::FilesystemClient,
    directories: &[DirectoryTask],
    failed_directories: &HashSet<PathBuf>,
    unsupported: &UnsupportedAttributes,
) {
    for directory in directories.iter().rev() {
        if failed_directories.contains(&directory.destination) {
            continue;
        }
        if let Err(error) = preserve_attributes(
            client,
            &directory.destination,
            &directory.source.metadata,
            unsupported,
        )
        .await
        {
            tracing::error!("{error}");
        }
    }
}

struct Run<'a> {
    source: &'a Endpoint,
    destination: &'a Endpoint,
    src_root: &'a Path,
    dest_root: &'a Path,
    settings: Settings,
    tracker: Arc<ProgressTracker>,
    cancel: tokio_util::sync::CancellationToken,
}

impl Run<'_> {
    async fn execute(self) -> Result<CopyReport, Error> {
        let start = std::time::Instant::now();
        let entries: Vec<fsclient::PathEntry> = crate::walk::walk(
            self.source.client.clone(),
            self.src_root,
            self.settings.filter.clone(),
        )
        .await?
        .try_collect()
        .await?;
        let planner = Planner {
            src_root: self.src_root,
            dest_root: self.dest_root,
            files_only: self.settings.files_only,
            chunk_size: self.settings.chunk_size,
        };
        let plan = planner.plan(entries)?;
        let total_bytes = plan.total_bytes();
        let (directories, mut tasks) = (plan.directories, plan.tasks);
        let root_created = ensure_directory(self.destination.client.as_ref(), self.dest_root)
            .await
            .map_err(|source| Error::DestinationRoot {
                path: self.dest_root.to_path_buf(),
                source,
            })?;
        let (mut directories_created, failed_directories) = create_directories(
            &self.destination.client,
            &directories,
            self.settings.worker_count(directories.len()),
        )
        .await;
        if root_created {
            directories_created += 1;
        }
        fail_orphans(&mut tasks, &failed_directories);
        self.tracker.set_totals(tasks.len() as u64, total_bytes);
        let unsupported_attributes = Arc::new(UnsupportedAttributes::default());
        let preserve = self.settings.preserve_attributes;
        let pool = Arc::new(WorkerPool {
            source: self.source.client.clone(),
            destination: self.destination.client.clone(),
            settings: self.settings,
            tracker: self.tracker.clone(),
            cancel: self.cancel.clone(),
            unsupported_attributes: unsupported_attributes.clone(),
        });
        let tasks = pool.run(tasks).await;
        if preserve && !self.cancel.is_cancelled() {
            preserve_directory_attributes(
                self.destination.client.as_ref(),
                &directories,
                &failed_directories,
                &unsupported_attributes,
            )
            .await;
        }
        let report = crate::report::finalize(&tasks, directories_created, start.elapsed());
        tracing::info!(
            "copied {} files, skipped {}, failed {}",
            report.copied,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }
}

/// Copies the tree at `src_root` on `source` to `dest_root` on `destination`.
///
/// Returns an [`Error`] only for conditions that make the whole run meaningless; individual file
/// failures are listed in the returned [`CopyReport`].
#[instrument(skip(source, destination, options))]
pub async fn transfer(
    source: &Endpoint,
    destination: &Endpoint,
    src_root: &Path,
    dest_root: &Path,
    options: &Options,
) -> Result<CopyReport, Error> {
    if source.kind == EndpointKind::Local && destination.kind == EndpointKind::Local {
        return Err(Error::InvalidConfiguration(
            "local to local transfers are not supported, use a regular file copy".to_string(),
        ));
    }
    let settings = options.validate()?;
    tracing::debug!("settings: {settings:?}");
    let tracker = Arc::new(ProgressTracker::new());
    let reporter = ProgressReporter::start(tracker.clone(), options.progress.as_ref());
    let run = Run {
        source,
        destination,
        src_root,
        dest_root,
        settings,
        tracker,
        cancel: options.cancel.clone(),
    };
    let result = run.execute().await;
    reporter.finish().await;
    result
}
