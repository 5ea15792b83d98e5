use std::os::unix::fs::MetadataExt;
use std::os::unix::prelude::PermissionsExt;
use std::path::Path;

use sha2::Digest;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

use crate::{ClientError, FileChecksum, FilesystemClient, Metadata, PathEntry};

/// Algorithm name of checksums computed by [`LocalClient`] and, by default, by
/// [`crate::MemoryClient`].
pub const CHECKSUM_ALGORITHM: &str = "SHA-256";

const CHECKSUM_READ_SIZE: usize = 1024 * 1024;

/// Local filesystem endpoint.
///
/// A symlink passed directly to [`FilesystemClient::status`] is followed; symlinks found while
/// listing a directory are skipped with a warning.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClient;

impl LocalClient {
    pub fn new() -> Self {
        Self
    }
}

fn user_name(uid: u32) -> String {
    match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

fn group_name(gid: u32) -> String {
    match nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(gid)) {
        Ok(Some(group)) => group.name,
        _ => gid.to_string(),
    }
}

fn resolve_uid(owner: &str) -> anyhow::Result<Option<nix::unistd::Uid>> {
    if owner.is_empty() {
        return Ok(None);
    }
    if let Some(user) = nix::unistd::User::from_name(owner)? {
        return Ok(Some(user.uid));
    }
    match owner.parse::<u32>() {
        Ok(uid) => Ok(Some(nix::unistd::Uid::from_raw(uid))),
        Err(_) => Err(anyhow::anyhow!("unknown user {owner:?}")),
    }
}

fn resolve_gid(group: &str) -> anyhow::Result<Option<nix::unistd::Gid>> {
    if group.is_empty() {
        return Ok(None);
    }
    if let Some(entry) = nix::unistd::Group::from_name(group)? {
        return Ok(Some(entry.gid));
    }
    match group.parse::<u32>() {
        Ok(gid) => Ok(Some(nix::unistd::Gid::from_raw(gid))),
        Err(_) => Err(anyhow::anyhow!("unknown group {group:?}")),
    }
}

// user database lookups may block, callers run this on the blocking pool
fn entry_from_metadata(path: std::path::PathBuf, metadata: &std::fs::Metadata) -> PathEntry {
    PathEntry {
        path,
        is_dir: metadata.is_dir(),
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        checksum: None,
        metadata: Metadata {
            owner: user_name(metadata.uid()),
            group: group_name(metadata.gid()),
            permission: metadata.permissions().mode() & 0o7777,
            modification_time: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
        },
    }
}

fn join_error(error: tokio::task::JoinError) -> ClientError {
    ClientError::Other(error.into())
}

#[async_trait::async_trait]
impl FilesystemClient for LocalClient {
    #[instrument]
    async fn status(&self, path: &Path) -> Result<PathEntry, ClientError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|err| {
            ClientError::from_io(err, path, format!("failed reading metadata from {path:?}"))
        })?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || entry_from_metadata(path, &metadata))
            .await
            .map_err(join_error)
    }

    #[instrument]
    async fn list(&self, path: &Path) -> Result<Vec<PathEntry>, ClientError> {
        let mut entries = tokio::fs::read_dir(path).await.map_err(|err| {
            ClientError::from_io(err, path, format!("cannot open directory {path:?} for reading"))
        })?;
        let traversal_error = |err: std::io::Error| {
            ClientError::from_io(err, path, format!("failed traversing directory {path:?}"))
        };
        let mut found = vec![];
        while let Some(entry) = entries.next_entry().await.map_err(traversal_error)? {
            let entry_path = entry.path();
            match tokio::fs::symlink_metadata(&entry_path).await {
                Ok(metadata) if metadata.file_type().is_symlink() => {
                    tracing::warn!("skipping symlink {:?}", &entry_path);
                }
                Ok(metadata) => found.push((entry_path, metadata)),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    // removed since read_dir returned it
                    tracing::warn!("skipping {:?}: {}", &entry_path, &error);
                }
                Err(error) => {
                    return Err(ClientError::from_io(
                        error,
                        &entry_path,
                        format!("failed reading metadata from {entry_path:?}"),
                    ));
                }
            }
        }
        tokio::task::spawn_blocking(move || {
            found
                .into_iter()
                .map(|(path, metadata)| entry_from_metadata(path, &metadata))
                .collect()
        })
        .await
        .map_err(join_error)
    }

    #[instrument]
    async fn checksum(&self, path: &Path) -> Result<FileChecksum, ClientError> {
        let mut file = tokio::fs::File::open(path).await.map_err(|err| {
            ClientError::from_io(err, path, format!("cannot open {path:?} for reading"))
        })?;
        let mut hasher = sha2::Sha256::new();
        let mut buffer = vec![0u8; CHECKSUM_READ_SIZE];
        loop {
            let read = file.read(&mut buffer).await.map_err(|err| {
                ClientError::from_io(err, path, format!("failed reading {path:?}"))
            })?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(FileChecksum::new(CHECKSUM_ALGORITHM, hasher.finalize().to_vec()))
    }

    #[instrument]
    async fn read_range(
        &self,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> Result<bytes::Bytes, ClientError> {
        let mut file = tokio::fs::File::open(path).await.map_err(|err| {
            ClientError::from_io(err, path, format!("cannot open {path:?} for reading"))
        })?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|err| {
            ClientError::from_io(err, path, format!("failed seeking {path:?} to {offset}"))
        })?;
        let mut buffer = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        file.take(length)
            .read_to_end(&mut buffer)
            .await
            .map_err(|err| ClientError::from_io(err, path, format!("failed reading {path:?}")))?;
        Ok(bytes::Bytes::from(buffer))
    }

    #[instrument(skip(data), fields(length = data.len()))]
    async fn write_range(
        &self,
        path: &Path,
        offset: u64,
        data: bytes::Bytes,
        create: bool,
    ) -> Result<(), ClientError> {
        let opened = if create {
            tokio::fs::File::create(path).await
        } else {
            tokio::fs::OpenOptions::new().write(true).open(path).await
        };
        let mut file = opened.map_err(|err| {
            ClientError::from_io(err, path, format!("cannot open {path:?} for writing"))
        })?;
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|err| {
                ClientError::from_io(err, path, format!("failed seeking {path:?} to {offset}"))
            })?;
        }
        file.write_all(&data)
            .await
            .map_err(|err| ClientError::from_io(err, path, format!("failed writing {path:?}")))?;
        file.flush()
            .await
            .map_err(|err| ClientError::from_io(err, path, format!("failed flushing {path:?}")))?;
        Ok(())
    }

    #[instrument]
    async fn mkdirs(&self, path: &Path) -> Result<(), ClientError> {
        tokio::fs::create_dir_all(path).await.map_err(|err| ClientError::Io {
            context: format!("cannot create directory {path:?}"),
            error: err,
        })
    }

    #[instrument]
    async fn set_attributes(&self, path: &Path, metadata: &Metadata) -> Result<(), ClientError> {
        let path = path.to_path_buf();
        let metadata = metadata.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ClientError> {
            // set timestamps first - the permissions below may leave us unable to open the file
            tracing::debug!("setting modification time");
            std::fs::File::open(&path)
                .and_then(|file| file.set_modified(metadata.modification_time))
                .map_err(|err| {
                    ClientError::from_io(
                        err,
                        &path,
                        format!("failed setting timestamps for {path:?}"),
                    )
                })?;
            tracing::debug!("setting permissions");
            let permissions = std::fs::Permissions::from_mode(metadata.permission & 0o7777);
            std::fs::set_permissions(&path, permissions.clone()).map_err(|err| {
                ClientError::from_io(
                    err,
                    &path,
                    format!("cannot set {path:?} permissions to {permissions:?}"),
                )
            })?;
            // set user and group last, if those fail we at least have the timestamps and mode set
            let uid = resolve_uid(&metadata.owner)?;
            let gid = resolve_gid(&metadata.group)?;
            if uid.is_some() || gid.is_some() {
                tracing::debug!("setting owner and group");
                nix::unistd::chown(path.as_path(), uid, gid).map_err(|errno| ClientError::Io {
                    context: format!("cannot set {path:?} owner to {uid:?} and group to {gid:?}"),
                    error: errno.into(),
                })?;
            }
            Ok(())
        })
        .await
        .map_err(join_error)?
    }
}
