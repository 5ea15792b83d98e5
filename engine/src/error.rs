use std::path::PathBuf;

/// Conditions that make a whole run meaningless.
///
/// These abort the run before any file task is dispatched. Failures that only affect a single
/// file are [`TaskError`]s and end up in the [`crate::CopyReport`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("source path {0:?} does not exist")]
    PathNotFound(PathBuf),
    #[error(
        "destination conflict: {first:?} and {second:?} would both be copied to {destination:?}"
    )]
    DestinationConflict {
        destination: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("failed listing source {path:?}: {source}")]
    SourceListing {
        path: PathBuf,
        source: fsclient::ClientError,
    },
    #[error("cannot create destination root {path:?}: {source}")]
    DestinationRoot {
        path: PathBuf,
        source: fsclient::ClientError,
    },
}

/// Why a single file task did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0:?} no longer exists")]
    PathNotFound(PathBuf),
    #[error("destination {0:?} differs from the source and overwrite is not enabled")]
    OverwriteConflict(PathBuf),
    #[error("{context}: {source}")]
    TransferIo {
        context: String,
        source: fsclient::ClientError,
    },
    #[error("parent directory {0:?} could not be created")]
    ParentDirectory(PathBuf),
    #[error("cancelled")]
    Cancelled,
    #[error("worker terminated while processing the task: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn transfer_io(context: impl Into<String>, source: fsclient::ClientError) -> Self {
        TaskError::TransferIo {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::PathNotFound(_) => FailureKind::PathNotFound,
            TaskError::OverwriteConflict(_) => FailureKind::OverwriteConflict,
            TaskError::TransferIo { .. } | TaskError::Panicked(_) => FailureKind::TransferIo,
            TaskError::ParentDirectory(_) => FailureKind::ParentDirectory,
            TaskError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Failure category as it appears in the report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PathNotFound,
    OverwriteConflict,
    TransferIo,
    ParentDirectory,
    Cancelled,
    Incomplete,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            FailureKind::PathNotFound => "path not found",
            FailureKind::OverwriteConflict => "overwrite conflict",
            FailureKind::TransferIo => "transfer i/o",
            FailureKind::ParentDirectory => "parent directory",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Incomplete => "incomplete",
        };
        write!(f, "{name}")
    }
}
