//! In-memory filesystem endpoint.
//!
//! `MemoryClient` keeps a whole tree in a map guarded by a mutex. Besides the plain
//! [`FilesystemClient`] operations it can:
//!
//! - report checksums under a custom algorithm name, to model endpoints that disagree on the
//!   checksum algorithm
//! - refuse `set_attributes`, to model endpoints without attribute support
//! - fail reads or writes of selected paths
//! - record every `write_range` call so callers can inspect how a file was written

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use sha2::Digest;

use crate::{ClientError, FileChecksum, FilesystemClient, Metadata, PathEntry};

#[derive(Clone, Debug)]
enum Node {
    Dir { metadata: Metadata },
    File { data: Vec<u8>, metadata: Metadata },
}

/// A single `write_range` call as seen by a [`MemoryClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
    pub create: bool,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    writes: Vec<WriteRecord>,
    failing_reads: HashSet<PathBuf>,
    failing_writes: HashSet<PathBuf>,
}

#[derive(Debug)]
pub struct MemoryClient {
    state: std::sync::Mutex<State>,
    checksum_algorithm: String,
    attributes_supported: bool,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

fn injected_failure(path: &Path, operation: &str) -> ClientError {
    ClientError::Io {
        context: format!("injected {operation} failure for {path:?}"),
        error: std::io::Error::other("injected failure"),
    }
}

impl MemoryClient {
    /// Creates an endpoint containing only the root directory `/`.
    pub fn new() -> Self {
        let mut state = State::default();
        state.nodes.insert(
            PathBuf::from("/"),
            Node::Dir {
                metadata: Metadata::default(),
            },
        );
        Self {
            state: std::sync::Mutex::new(state),
            checksum_algorithm: crate::local::CHECKSUM_ALGORITHM.to_string(),
            attributes_supported: true,
        }
    }

    pub fn with_checksum_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.checksum_algorithm = algorithm.into();
        self
    }

    pub fn without_attributes(mut self) -> Self {
        self.attributes_supported = false;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn insert_parents(state: &mut State, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            state
                .nodes
                .entry(ancestor.to_path_buf())
                .or_insert_with(|| Node::Dir {
                    metadata: Metadata {
                        permission: 0o755,
                        ..Default::default()
                    },
                });
        }
    }

    /// Adds (or replaces) a file, creating missing parent directories.
    pub fn add_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        self.add_file_with_metadata(path, data, Metadata::default());
    }

    pub fn add_file_with_metadata(
        &self,
        path: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        metadata: Metadata,
    ) {
        let path = path.as_ref();
        let mut state = self.lock();
        Self::insert_parents(&mut state, path);
        state.nodes.insert(
            path.to_path_buf(),
            Node::File {
                data: data.into(),
                metadata,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.lock();
        Self::insert_parents(&mut state, path);
        state
            .nodes
            .entry(path.to_path_buf())
            .or_insert_with(|| Node::Dir {
                metadata: Metadata {
                    permission: 0o755,
                    ..Default::default()
                },
            });
    }

    /// Removes `path` and everything beneath it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.lock()
            .nodes
            .retain(|node_path, _| !node_path.starts_with(path));
    }

    pub fn fail_reads(&self, path: impl AsRef<Path>) {
        self.lock()
            .failing_reads
            .insert(path.as_ref().to_path_buf());
    }

    pub fn fail_writes(&self, path: impl AsRef<Path>) {
        self.lock()
            .failing_writes
            .insert(path.as_ref().to_path_buf());
    }

    /// Contents of a file, `None` if absent or a directory.
    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.lock().nodes.get(path.as_ref()) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.lock().nodes.get(path.as_ref()), Some(Node::Dir { .. }))
    }

    pub fn metadata(&self, path: impl AsRef<Path>) -> Option<Metadata> {
        self.lock().nodes.get(path.as_ref()).map(|node| match node {
            Node::Dir { metadata } | Node::File { metadata, .. } => metadata.clone(),
        })
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    fn entry(path: &Path, node: &Node) -> PathEntry {
        match node {
            Node::Dir { metadata } => PathEntry {
                path: path.to_path_buf(),
                is_dir: true,
                size: 0,
                checksum: None,
                metadata: metadata.clone(),
            },
            Node::File { data, metadata } => PathEntry {
                path: path.to_path_buf(),
                is_dir: false,
                size: data.len() as u64,
                checksum: None,
                metadata: metadata.clone(),
            },
        }
    }
}

#[async_trait::async_trait]
impl FilesystemClient for MemoryClient {
    async fn status(&self, path: &Path) -> Result<PathEntry, ClientError> {
        let state = self.lock();
        let node = state
            .nodes
            .get(path)
            .ok_or_else(|| ClientError::NotFound(path.to_path_buf()))?;
        Ok(Self::entry(path, node))
    }

    async fn list(&self, path: &Path) -> Result<Vec<PathEntry>, ClientError> {
        let state = self.lock();
        match state.nodes.get(path) {
            None => return Err(ClientError::NotFound(path.to_path_buf())),
            Some(Node::File { .. }) => {
                return Err(ClientError::Io {
                    context: format!("cannot list {path:?}"),
                    error: std::io::Error::from(std::io::ErrorKind::NotADirectory),
                });
            }
            Some(Node::Dir { .. }) => {}
        }
        Ok(state
            .nodes
            .iter()
            .filter(|(node_path, _)| node_path.parent() == Some(path))
            .map(|(node_path, node)| Self::entry(node_path, node))
            .collect())
    }

    async fn checksum(&self, path: &Path) -> Result<FileChecksum, ClientError> {
        let state = self.lock();
        match state.nodes.get(path) {
            Some(Node::File { data, .. }) => Ok(FileChecksum::new(
                self.checksum_algorithm.clone(),
                sha2::Sha256::digest(data).to_vec(),
            )),
            Some(Node::Dir { .. }) => Err(ClientError::Io {
                context: format!("cannot checksum {path:?}"),
                error: std::io::Error::from(std::io::ErrorKind::IsADirectory),
            }),
            None => Err(ClientError::NotFound(path.to_path_buf())),
        }
    }

    async fn read_range(
        &self,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> Result<bytes::Bytes, ClientError> {
        let state = self.lock();
        if state.failing_reads.contains(path) {
            return Err(injected_failure(path, "read"));
        }
        match state.nodes.get(path) {
            Some(Node::File { data, .. }) => {
                let start = usize::try_from(offset)
                    .unwrap_or(usize::MAX)
                    .min(data.len());
                let end = usize::try_from(offset.saturating_add(length))
                    .unwrap_or(usize::MAX)
                    .min(data.len());
                Ok(bytes::Bytes::copy_from_slice(&data[start..end]))
            }
            Some(Node::Dir { .. }) => Err(ClientError::Io {
                context: format!("cannot read {path:?}"),
                error: std::io::Error::from(std::io::ErrorKind::IsADirectory),
            }),
            None => Err(ClientError::NotFound(path.to_path_buf())),
        }
    }

    async fn write_range(
        &self,
        path: &Path,
        offset: u64,
        data: bytes::Bytes,
        create: bool,
    ) -> Result<(), ClientError> {
        let mut state = self.lock();
        if state.failing_writes.contains(path) {
            return Err(injected_failure(path, "write"));
        }
        let parent_is_dir = path
            .parent()
            .is_some_and(|parent| matches!(state.nodes.get(parent), Some(Node::Dir { .. })));
        if !parent_is_dir {
            return Err(ClientError::NotFound(path.to_path_buf()));
        }
        state.writes.push(WriteRecord {
            path: path.to_path_buf(),
            offset,
            length: data.len() as u64,
            create,
        });
        if create {
            if matches!(state.nodes.get(path), Some(Node::Dir { .. })) {
                return Err(ClientError::Io {
                    context: format!("cannot create {path:?}"),
                    error: std::io::Error::from(std::io::ErrorKind::IsADirectory),
                });
            }
            state.nodes.insert(
                path.to_path_buf(),
                Node::File {
                    data: Vec::new(),
                    metadata: Metadata::default(),
                },
            );
        }
        match state.nodes.get_mut(path) {
            Some(Node::File { data: contents, .. }) => {
                let start = usize::try_from(offset).map_err(anyhow::Error::from)?;
                let end = start + data.len();
                if contents.len() < end {
                    contents.resize(end, 0);
                }
                contents[start..end].copy_from_slice(&data);
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(ClientError::Io {
                context: format!("cannot write {path:?}"),
                error: std::io::Error::from(std::io::ErrorKind::IsADirectory),
            }),
            None => Err(ClientError::NotFound(path.to_path_buf())),
        }
    }

    async fn mkdirs(&self, path: &Path) -> Result<(), ClientError> {
        let mut state = self.lock();
        for ancestor in path.ancestors() {
            if let Some(Node::File { .. }) = state.nodes.get(ancestor) {
                return Err(ClientError::Io {
                    context: format!("cannot create directory {path:?}"),
                    error: std::io::Error::from(std::io::ErrorKind::NotADirectory),
                });
            }
        }
        Self::insert_parents(&mut state, path);
        state
            .nodes
            .entry(path.to_path_buf())
            .or_insert_with(|| Node::Dir {
                metadata: Metadata {
                    permission: 0o755,
                    ..Default::default()
                },
            });
        Ok(())
    }

    async fn set_attributes(&self, path: &Path, metadata: &Metadata) -> Result<(), ClientError> {
        if !self.attributes_supported {
            return Err(ClientError::Unsupported {
                operation: "set_attributes",
            });
        }
        let mut state = self.lock();
        match state.nodes.get_mut(path) {
            Some(Node::Dir { metadata: current } | Node::File { metadata: current, .. }) => {
                *current = metadata.clone();
                Ok(())
            }
            None => Err(ClientError::NotFound(path.to_path_buf())),
        }
    }
}
