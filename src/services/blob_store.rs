//! Durable blob storage addressed by key.
//!
//! [`DiskBlobStore`] keeps payloads on local disk sharded beneath
//! `base_path/{shard}/{shard}/{key}`, writing through a temp file that is
//! fsynced and renamed into place.

use super::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

const MAX_KEY_LEN: usize = 1024;

/// Canned access policy applied to a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    /// Retrievable by anyone holding the returned URL.
    PublicRead,
    /// Only reachable through the store itself.
    Private,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store everything readable from `body` under `key` and return its
    /// retrieval URL. Overwrites an existing blob with the same key.
    async fn put(&self, key: &str, body: BoxReader, acl: Acl) -> StoreResult<String>;

    /// Open a blob for streaming.
    async fn get(&self, key: &str) -> StoreResult<BoxReader>;

    /// Delete a blob. Returns `false` if it did not exist.
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}

/// Reject keys that could escape the storage root.
fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let unsafe_key = key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == ".." || segment == ".")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if unsafe_key {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub struct DiskBlobStore {
    base_path: PathBuf,
    public_base_url: String,
}

impl DiskBlobStore {
    /// Create a store rooted at `base_path`. Public blobs are addressed as
    /// `{public_base_url}/{key}`.
    pub async fn new(
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self {
            base_path,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Two-level shard directories from MD5(key), first two bytes as hex.
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn location(&self, key: &str, path: &Path, acl: Acl) -> String {
        match acl {
            Acl::PublicRead => format!("{}/{}", self.public_base_url, key),
            Acl::Private => format!("file://{}", path.display()),
        }
    }

    /// Remove empty directories from `start` up to, but excluding, the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn write_synced(file: &mut File, body: &mut BoxReader) -> io::Result<u64> {
    let written = tokio::io::copy(body, file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(&self, key: &str, mut body: BoxReader, acl: Acl) -> StoreResult<String> {
        ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let written = match write_synced(&mut file, &mut body).await {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        };
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        debug!(key, bytes = written, ?acl, "stored blob");
        Ok(self.location(key, &file_path, acl))
    }

    async fn get(&self, key: &str) -> StoreResult<BoxReader> {
        ensure_key_safe(key)?;
        match File::open(self.blob_path(key)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::BlobNotFound(key.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        let existed = match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed blob file {}", file_path.display());
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob file {} already missing", file_path.display());
                false
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(existed)
    }
}
