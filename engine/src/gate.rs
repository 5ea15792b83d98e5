//! Skip, overwrite or refuse: what to do with a file that may already exist at the destination.

use tracing::instrument;

use crate::error::TaskError;
use crate::task::TransferTask;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Destination already holds the same content
    Skip,
    Proceed,
}

/// Policy knobs of the gate.
#[derive(Clone, Copy, Debug)]
pub struct Gate {
    pub checksum: bool,
    pub overwrite: bool,
}

impl Gate {
    async fn source_checksum(
        task: &TransferTask,
        source: &dyn fsclient::FilesystemClient,
    ) -> Result<Option<fsclient::FileChecksum>, TaskError> {
        if let Some(checksum) = &task.source.checksum {
            return Ok(Some(checksum.clone()));
        }
        match source.checksum(&task.source.path).await {
            Ok(checksum) => Ok(Some(checksum)),
            Err(error) if error.is_not_found() => {
                Err(TaskError::PathNotFound(task.source.path.clone()))
            }
            Err(error) => {
                tracing::debug!(
                    "no checksum for source {:?}, treating as different: {error}",
                    task.source.path
                );
                Ok(None)
            }
        }
    }

    /// Decides the fate of `task`; an `Err` is a terminal failure for the task.
    #[instrument(skip(self, task, source, destination), fields(path = ?task.destination))]
    pub async fn decide(
        &self,
        task: &TransferTask,
        source: &dyn fsclient::FilesystemClient,
        destination: &dyn fsclient::FilesystemClient,
    ) -> Result<Decision, TaskError> {
        match destination.status(&task.destination).await {
            Ok(_) => {}
            Err(error) if error.is_not_found() => {
                tracing::debug!("destination does not exist");
                return Ok(Decision::Proceed);
            }
            Err(error) => {
                return Err(TaskError::transfer_io(
                    format!("failed checking destination {:?}", task.destination),
                    error,
                ));
            }
        }
        if !self.checksum {
            if self.overwrite {
                tracing::debug!("destination exists, overwriting");
                return Ok(Decision::Proceed);
            }
            return Err(TaskError::OverwriteConflict(task.destination.clone()));
        }
        let source_checksum = Self::source_checksum(task, source).await?;
        let destination_checksum = match destination.checksum(&task.destination).await {
            Ok(checksum) => Some(checksum),
            Err(error) => {
                tracing::debug!("no checksum for destination, treating as different: {error}");
                None
            }
        };
        let same = match (&source_checksum, &destination_checksum) {
            (Some(src), Some(dst)) => src == dst,
            _ => false,
        };
        if same {
            tracing::debug!("checksums match, skipping");
            return Ok(Decision::Skip);
        }
        if self.overwrite {
            tracing::debug!("checksums differ, overwriting");
            return Ok(Decision::Proceed);
        }
        Err(TaskError::OverwriteConflict(task.destination.clone()))
    }
}
