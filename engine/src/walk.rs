//! Source tree discovery.
//!
//! The walk lists one directory at a time, only when the consumer asks for more entries, so a
//! large tree is never held in memory twice. Directories are always yielded; files are yielded
//! only if they pass the [`FileFilter`]. The root itself is not yielded unless it is a file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tracing::instrument;

use crate::error::Error;
use crate::filter::FileFilter;

struct WalkState {
    client: Arc<dyn fsclient::FilesystemClient>,
    filter: FileFilter,
    root: PathBuf,
    pending: VecDeque<fsclient::PathEntry>,
    directories: Vec<PathBuf>,
}

impl WalkState {
    async fn next(mut self) -> Option<(Result<fsclient::PathEntry, Error>, Self)> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some((Ok(entry), self));
            }
            let directory = self.directories.pop()?;
            tracing::debug!("listing {directory:?}");
            match self.client.list(&directory).await {
                Ok(children) => {
                    for child in children {
                        if child.is_dir {
                            self.directories.push(child.path.clone());
                        }
                        if self.filter.accepts(&child) {
                            self.pending.push_back(child);
                        } else {
                            tracing::trace!("filtered out {:?}", child.path);
                        }
                    }
                }
                Err(error) if error.is_not_found() && directory != self.root => {
                    tracing::warn!("directory {directory:?} disappeared during the walk, skipping");
                }
                Err(error) if error.is_not_found() => {
                    self.directories.clear();
                    return Some((Err(Error::PathNotFound(directory)), self));
                }
                Err(source) => {
                    // the stream ends after the first listing error
                    self.directories.clear();
                    return Some((
                        Err(Error::SourceListing {
                            path: directory,
                            source,
                        }),
                        self,
                    ));
                }
            }
        }
    }
}

/// Starts walking `root` on `client`.
///
/// Fails immediately with [`Error::PathNotFound`] if `root` does not exist.
#[instrument(skip(client, filter))]
pub async fn walk(
    client: Arc<dyn fsclient::FilesystemClient>,
    root: &Path,
    filter: FileFilter,
) -> Result<BoxStream<'static, Result<fsclient::PathEntry, Error>>, Error> {
    let root_entry = match client.status(root).await {
        Ok(entry) => entry,
        Err(error) if error.is_not_found() => return Err(Error::PathNotFound(root.to_path_buf())),
        Err(source) => {
            return Err(Error::SourceListing {
                path: root.to_path_buf(),
                source,
            });
        }
    };
    if !root_entry.is_dir {
        let entries = if filter.accepts(&root_entry) {
            vec![Ok(root_entry)]
        } else {
            vec![]
        };
        return Ok(futures::stream::iter(entries).boxed());
    }
    let state = WalkState {
        client,
        filter,
        root: root.to_path_buf(),
        pending: VecDeque::new(),
        directories: vec![root.to_path_buf()],
    };
    Ok(futures::stream::unfold(state, WalkState::next).boxed())
}
