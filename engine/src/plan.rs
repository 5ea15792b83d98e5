//! Mapping discovered source entries to destination paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::chunk::{ChunkSize, split};
use crate::error::Error;
use crate::task::TransferTask;

/// A destination directory to create before any file beneath it is copied.
#[derive(Clone, Debug)]
pub struct DirectoryTask {
    pub source: fsclient::PathEntry,
    pub destination: PathBuf,
}

#[derive(Debug, Default)]
pub struct Plan {
    /// Sorted by destination path, so parents come before their children
    pub directories: Vec<DirectoryTask>,
    pub tasks: Vec<TransferTask>,
}

impl Plan {
    pub fn total_bytes(&self) -> u64 {
        self.tasks.iter().map(|task| task.source.size).sum()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Planner<'a> {
    pub src_root: &'a Path,
    pub dest_root: &'a Path,
    pub files_only: bool,
    pub chunk_size: ChunkSize,
}

impl Planner<'_> {
    fn relative<'p>(&self, path: &'p Path) -> Result<&'p Path, Error> {
        path.strip_prefix(self.src_root).map_err(|_| Error::SourceListing {
            path: path.to_path_buf(),
            source: fsclient::ClientError::Other(anyhow::anyhow!(
                "listed entry is outside of the source root {:?}",
                self.src_root
            )),
        })
    }

    fn basename<'p>(&self, path: &'p Path) -> Result<&'p std::ffi::OsStr, Error> {
        path.file_name().ok_or_else(|| {
            Error::InvalidConfiguration(format!("source path {path:?} has no file name"))
        })
    }

    fn file_destination(&self, path: &Path) -> Result<PathBuf, Error> {
        if self.files_only || path == self.src_root {
            return Ok(self.dest_root.join(self.basename(path)?));
        }
        Ok(self.dest_root.join(self.relative(path)?))
    }

    /// Builds the directory and file tasks for a set of discovered entries.
    ///
    /// With `files_only` two files with the same name are a [`Error::DestinationConflict`].
    pub fn plan(
        &self,
        entries: impl IntoIterator<Item = fsclient::PathEntry>,
    ) -> Result<Plan, Error> {
        let mut plan = Plan::default();
        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
        for entry in entries {
            if entry.is_dir {
                if self.files_only {
                    continue;
                }
                let destination = self.dest_root.join(self.relative(&entry.path)?);
                plan.directories.push(DirectoryTask {
                    source: entry,
                    destination,
                });
                continue;
            }
            let destination = self.file_destination(&entry.path)?;
            if let Some(first) = claimed.insert(destination.clone(), entry.path.clone()) {
                return Err(Error::DestinationConflict {
                    destination,
                    first,
                    second: entry.path,
                });
            }
            let chunks = split(entry.size, self.chunk_size);
            plan.tasks.push(TransferTask::new(entry, destination, chunks));
        }
        plan.directories
            .sort_by(|a, b| a.destination.cmp(&b.destination));
        tracing::debug!(
            "planned {} directories and {} files",
            plan.directories.len(),
            plan.tasks.len()
        );
        Ok(plan)
    }
}
