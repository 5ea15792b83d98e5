//! Filesystem endpoint interface for rdcp tools
//!
//! The transfer engine never talks to a storage system directly. Each side of a transfer is a
//! [`FilesystemClient`]: something that can stat and list paths, fetch a content checksum, read
//! and write byte ranges, create directories and (optionally) apply file attributes.
//!
//! This crate ships two endpoints:
//!
//! - [`LocalClient`] - the local filesystem, backed by `tokio::fs`
//! - [`MemoryClient`] - an in-process tree, useful for tests and for embedding the engine
//!
//! Remote clusters speaking a REST filesystem protocol plug in by implementing the trait; the
//! wire protocol itself (authentication, retries, timeouts) is the implementor's business.
//!
//! # Write semantics
//!
//! [`FilesystemClient::write_range`] with `create = true` creates the file, truncating any
//! existing content, and then writes the data at the given offset. With `create = false` the
//! file must already exist and the data is written in place. The engine always issues the first
//! chunk of a file with `create = true` and the remaining chunks, in order, with `create = false`.

use std::path::{Path, PathBuf};

pub mod local;
pub mod memory;

pub use local::LocalClient;
pub use memory::MemoryClient;

/// Errors reported by a filesystem endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("path {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("{operation} is not supported by this endpoint")]
    Unsupported { operation: &'static str },
    #[error("{context}: {error}")]
    Io {
        context: String,
        error: std::io::Error,
    },
    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    /// Wraps an I/O error, mapping `NotFound` to [`ClientError::NotFound`] for `path`.
    pub fn from_io(error: std::io::Error, path: &Path, context: impl Into<String>) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            return ClientError::NotFound(path.to_path_buf());
        }
        ClientError::Io {
            context: context.into(),
            error,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ClientError::Unsupported { .. })
    }
}

/// A content checksum as reported by an endpoint.
///
/// Two checksums are equal only if both the algorithm name and the digest bytes match, so
/// checksums produced by different algorithms never compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FileChecksum {
    pub algorithm: String,
    pub bytes: Vec<u8>,
}

impl FileChecksum {
    pub fn new(algorithm: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm: algorithm.into(),
            bytes: bytes.into(),
        }
    }
}

impl std::fmt::Display for FileChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(&self.bytes))
    }
}

/// Ownership, permission and timestamp attributes of a path.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Metadata {
    pub owner: String,
    pub group: String,
    pub permission: u32,
    pub modification_time: std::time::SystemTime,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            owner: String::new(),
            group: String::new(),
            permission: 0o644,
            modification_time: std::time::UNIX_EPOCH,
        }
    }
}

/// Status of a single file or directory.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PathEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    /// Checksum if the endpoint reports it as part of a listing.
    pub checksum: Option<FileChecksum>,
    pub metadata: Metadata,
}

impl PathEntry {
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }
}

/// One side of a transfer.
#[async_trait::async_trait]
pub trait FilesystemClient: std::fmt::Debug + Send + Sync {
    /// Status of a single path.
    async fn status(&self, path: &Path) -> Result<PathEntry, ClientError>;

    /// Direct children of a directory.
    async fn list(&self, path: &Path) -> Result<Vec<PathEntry>, ClientError>;

    async fn checksum(&self, path: &Path) -> Result<FileChecksum, ClientError>;

    /// Reads up to `length` bytes starting at `offset`; fewer bytes are returned only at the end
    /// of the file.
    async fn read_range(
        &self,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> Result<bytes::Bytes, ClientError>;

    /// Writes `data` at `offset`, creating (or truncating) the file first when `create` is set.
    async fn write_range(
        &self,
        path: &Path,
        offset: u64,
        data: bytes::Bytes,
        create: bool,
    ) -> Result<(), ClientError>;

    /// Creates `path` and any missing parents; succeeds if the directory already exists.
    async fn mkdirs(&self, path: &Path) -> Result<(), ClientError>;

    /// Applies owner, group, permission bits and modification time to `path`.
    async fn set_attributes(&self, path: &Path, metadata: &Metadata) -> Result<(), ClientError> {
        let _ = (path, metadata);
        Err(ClientError::Unsupported {
            operation: "set_attributes",
        })
    }
}
