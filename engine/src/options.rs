//! Transfer options and their validation.

use crate::chunk::ChunkSize;
use crate::error::Error;
use crate::filter::FileFilter;
use crate::progress::ProgressSink;

/// Upper bound on concurrent workers when `concurrency` is 0 (one worker per file).
pub const MAX_WORKERS: usize = 256;

pub const DEFAULT_PROGRESS_DELAY: std::time::Duration = std::time::Duration::from_millis(200);

/// Where and how often progress snapshots are delivered.
#[derive(Clone)]
pub struct ProgressSettings {
    pub sink: std::sync::Arc<dyn ProgressSink>,
    pub delay: std::time::Duration,
}

impl ProgressSettings {
    pub fn new(sink: std::sync::Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            delay: DEFAULT_PROGRESS_DELAY,
        }
    }
}

impl std::fmt::Debug for ProgressSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ProgressSettings")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Caller-facing transfer options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Replace destination files that exist and differ from the source
    pub overwrite: bool,
    /// Compare checksums to skip files already present at the destination
    pub checksum: bool,
    /// Bytes per read/write operation, must be a power of two
    pub chunk_size: u64,
    /// Number of workers, 0 = one per file (capped at [`MAX_WORKERS`])
    pub concurrency: usize,
    /// Glob matched against file names
    pub include_pattern: String,
    /// Files smaller than this are not transferred
    pub min_size: u64,
    /// Copy all files directly into the destination directory
    pub files_only: bool,
    /// Copy owner, group, permission bits and modification time
    pub preserve_attributes: bool,
    pub progress: Option<ProgressSettings>,
    /// Cancelling this token stops dispatching new files
    pub cancel: tokio_util::sync::CancellationToken,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            overwrite: false,
            checksum: true,
            chunk_size: crate::chunk::DEFAULT_CHUNK_SIZE,
            concurrency: 0,
            include_pattern: crate::filter::DEFAULT_INCLUDE_PATTERN.to_string(),
            min_size: 0,
            files_only: false,
            preserve_attributes: false,
            progress: None,
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    }
}

impl Options {
    /// Validates the options once, before any work starts.
    pub fn validate(&self) -> Result<Settings, Error> {
        let chunk_size = ChunkSize::new(self.chunk_size)?;
        let filter = FileFilter::new(&self.include_pattern, self.min_size)
            .map_err(|err| Error::InvalidConfiguration(format!("{err:#}")))?;
        if let Some(progress) = &self.progress
            && progress.delay.is_zero()
        {
            return Err(Error::InvalidConfiguration(
                "progress delay must be greater than zero".to_string(),
            ));
        }
        Ok(Settings {
            overwrite: self.overwrite,
            checksum: self.checksum,
            chunk_size,
            concurrency: self.concurrency,
            filter,
            files_only: self.files_only,
            preserve_attributes: self.preserve_attributes,
        })
    }
}

/// Validated settings the engine runs with.
#[derive(Clone, Debug)]
pub struct Settings {
    pub overwrite: bool,
    pub checksum: bool,
    pub chunk_size: ChunkSize,
    pub concurrency: usize,
    pub filter: FileFilter,
    pub files_only: bool,
    pub preserve_attributes: bool,
}

impl Settings {
    /// Number of workers to start for `tasks` file tasks.
    pub fn worker_count(&self, tasks: usize) -> usize {
        let workers = if self.concurrency == 0 {
            tasks.min(MAX_WORKERS)
        } else {
            self.concurrency.min(tasks)
        };
        workers.max(1)
    }
}
