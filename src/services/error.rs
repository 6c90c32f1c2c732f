//! Error types shared by the store clients and the services built on them.

use crate::models::asset::UploadedFile;
use std::io;
use thiserror::Error;

/// Failures raised by the blob store or the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store path `{0}`")]
    InvalidPath(String),
    #[error("invalid blob key `{0}`")]
    InvalidKey(String),
    #[error("blob `{0}` not found")]
    BlobNotFound(String),
    #[error("record `{0}` not found")]
    RecordNotFound(String),
    #[error("record `{path}` is malformed: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of a core operation. The `Display` text is the message handed
/// back to callers in the failure envelope.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Permission(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Metadata is gone but the blob survived: an orphan, reported as a failure.
    #[error("File \"{id}\" was removed but its stored content could not be deleted: {source}")]
    PartialDelete {
        id: String,
        #[source]
        source: StoreError,
    },
    /// A batch upload stopped at `name`; `committed` lists the files stored before it.
    #[error("Failed to upload \"{name}\": {source}")]
    Upload {
        name: String,
        committed: Vec<UploadedFile>,
        #[source]
        source: StoreError,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn file_not_found(id: &str) -> Self {
        Self::NotFound(format!("File with id \"{id}\" does not exist."))
    }

    pub fn user_not_found(id: &str) -> Self {
        Self::NotFound(format!("User with id \"{id}\" does not exist."))
    }
}
