//! Local staging of incoming upload bodies.
//!
//! Each file is streamed into `staging_dir/{uuid}` before it is handed to the
//! blob store. A [`StagedFile`] owns its temp file: [`StagedFile::release`]
//! removes it once the blob write has succeeded, and dropping an unreleased
//! guard removes it on every other path.

use super::error::{ServiceError, ServiceResult, StoreError};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    fmt::Display,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Writes upload bodies into a staging directory.
#[derive(Clone, Debug)]
pub struct Stager {
    dir: PathBuf,
    max_file_bytes: u64,
}

impl Stager {
    pub fn new(dir: impl Into<PathBuf>, max_file_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_file_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Stream `chunks` into a new staging file for the upload named `name`.
    ///
    /// Fails with a validation error if the body exceeds the size limit or
    /// the incoming stream breaks; local I/O errors surface as store errors.
    pub async fn stage<S, E>(&self, name: impl Into<String>, chunks: S) -> ServiceResult<StagedFile>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let name = name.into();
        fs::create_dir_all(&self.dir).await.map_err(StoreError::from)?;
        let path = self.dir.join(Uuid::new_v4().to_string());
        let mut file = File::create(&path).await.map_err(StoreError::from)?;
        let mut staged = StagedFile {
            path,
            name,
            size: 0,
            released: false,
        };

        pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|err| {
                ServiceError::Validation(format!("Failed to read \"{}\": {}", staged.name, err))
            })?;
            staged.size += chunk.len() as u64;
            if staged.size > self.max_file_bytes {
                return Err(ServiceError::Validation(format!(
                    "File \"{}\" is larger than {} bytes.",
                    staged.name, self.max_file_bytes
                )));
            }
            file.write_all(&chunk).await.map_err(StoreError::from)?;
        }
        file.flush().await.map_err(StoreError::from)?;

        debug!(name = %staged.name, size = staged.size, path = %staged.path.display(), "staged upload");
        Ok(staged)
    }
}

/// A staged upload body. Removed from disk exactly once.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    name: String,
    size: u64,
    released: bool,
}

impl StagedFile {
    /// Original filename as supplied by the uploader.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn open(&self) -> std::io::Result<File> {
        File::open(&self.path).await
    }

    /// Delete the staging file now.
    pub async fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(_) => debug!("discarded staged upload {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to discard staged upload {}: {}", self.path.display(), err),
        }
    }
}
