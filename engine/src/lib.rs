//! Parallel, chunked file tree transfer between filesystem endpoints
//!
//! The engine copies a directory tree (or a single file) from one [`fsclient::FilesystemClient`]
//! to another. Files are split into fixed-size chunks and copied by a pool of workers; each
//! worker copies the chunks of one file in order. Existing destination files are skipped when
//! their checksum matches the source, overwritten when allowed and reported as conflicts
//! otherwise.
//!
//! # Entry points
//!
//! - [`copy`] - both endpoints remote
//! - [`upload`] - local source, remote destination
//! - [`download`] - remote source, local destination
//! - [`transfer()`] - any combination except local to local
//!
//! Every entry point returns a [`CopyReport`] accounting for each discovered file: copied,
//! skipped or failed with a reason. An [`Error`] is returned only when the run cannot proceed
//! at all: invalid options, a missing source root, a files-only name collision, a failed source
//! listing or a destination root that cannot be created.
//!
//! # Pipeline
//!
//! 1. [`walk()`] lists the source tree lazily and applies the [`filter::FileFilter`]
//! 2. [`plan::Planner`] maps entries to destination paths and splits files into chunks
//! 3. destination directories are created before any file is dispatched
//! 4. [`pool::WorkerPool`] runs each file through the [`gate::Gate`] and copies its chunks
//! 5. [`report::finalize`] turns terminal task states into the report
//!
//! Progress can be observed through [`ProgressSettings`]; the run can be stopped through
//! [`Options::cancel`], in which case unstarted files are reported as cancelled.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let source = Arc::new(fsclient::MemoryClient::new());
//! source.add_file("/data/a.txt", "hello");
//! let destination = Arc::new(fsclient::MemoryClient::new());
//! let report = engine::copy(
//!     source,
//!     destination.clone(),
//!     Path::new("/data"),
//!     Path::new("/backup"),
//!     &engine::Options::default(),
//! )
//! .await?;
//! assert_eq!(report.copied, 1);
//! assert_eq!(destination.read("/backup/a.txt").unwrap(), b"hello");
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

pub mod chunk;
pub mod error;
pub mod filter;
pub mod gate;
pub mod options;
pub mod plan;
pub mod pool;
pub mod progress;
pub mod report;
pub mod task;
pub mod transfer;
pub mod walk;

pub use error::{Error, FailureKind, TaskError};
pub use options::{Options, ProgressSettings};
pub use progress::{BarSink, LogSink, ProgressSink, ProgressState};
pub use report::{CopyReport, FailedTransfer};
pub use transfer::{Endpoint, EndpointKind, transfer};
pub use walk::walk;

/// Copies `src_path` between two remote endpoints.
pub async fn copy(
    source: Arc<dyn fsclient::FilesystemClient>,
    destination: Arc<dyn fsclient::FilesystemClient>,
    src_path: &Path,
    dest_path: &Path,
    options: &Options,
) -> Result<CopyReport, Error> {
    transfer(
        &Endpoint::remote(source),
        &Endpoint::remote(destination),
        src_path,
        dest_path,
        options,
    )
    .await
}

/// Copies the local `local_src_path` to `dest_path` on a remote endpoint.
pub async fn upload(
    destination: Arc<dyn fsclient::FilesystemClient>,
    dest_path: &Path,
    local_src_path: &Path,
    options: &Options,
) -> Result<CopyReport, Error> {
    transfer(
        &Endpoint::local(),
        &Endpoint::remote(destination),
        local_src_path,
        dest_path,
        options,
    )
    .await
}

/// Copies `src_path` from a remote endpoint to the local `local_dest_path`.
pub async fn download(
    source: Arc<dyn fsclient::FilesystemClient>,
    src_path: &Path,
    local_dest_path: &Path,
    options: &Options,
) -> Result<CopyReport, Error> {
    transfer(
        &Endpoint::remote(source),
        &Endpoint::local(),
        src_path,
        local_dest_path,
        options,
    )
    .await
}
