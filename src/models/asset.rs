//! Represents an uploaded image: its stored record and the views handed to callers.

use serde::{Deserialize, Serialize};

/// Metadata namespace holding asset records.
pub const ASSET_NAMESPACE: &str = "images";

/// Extensions accepted by the upload pipeline. Matched case-sensitively.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "gif", "jpeg"];

/// Blob key for an asset. Upload, delete and download all derive it here.
pub fn blob_key(id: &str, name: &str) -> String {
    format!("images/{id}-{name}")
}

/// Metadata path of an asset record.
pub fn record_path(id: &str) -> String {
    format!("{ASSET_NAMESPACE}/{id}")
}

/// Caller-facing link that routes a download through the visibility gate.
pub fn download_link(id: &str) -> String {
    format!("./api/images/i/{id}/download")
}

fn default_public() -> bool {
    true
}

/// The stored asset record.
///
/// `link` is the direct blob URL and must never reach a caller; convert to
/// [`AssetView`] before returning a record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Asset {
    pub id: String,

    /// Direct retrieval URL returned by the blob store.
    #[serde(default)]
    pub link: String,

    /// Original filename as supplied by the uploader.
    pub name: String,

    #[serde(default = "default_public")]
    pub public: bool,

    /// Uploading user, if any. Older records call this `user_id`.
    #[serde(default, alias = "user_id")]
    pub owner_id: Option<String>,

    #[serde(default)]
    pub downloads: u64,
}

impl Asset {
    /// A freshly uploaded asset: public, never downloaded.
    pub fn new(id: String, link: String, name: String, owner_id: Option<String>) -> Self {
        Self {
            id,
            link,
            name,
            public: true,
            owner_id,
            downloads: 0,
        }
    }

    pub fn blob_key(&self) -> String {
        blob_key(&self.id, &self.name)
    }
}

/// An asset record with the direct blob link stripped.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AssetView {
    pub id: String,
    pub name: String,
    pub public: bool,
    pub owner_id: Option<String>,
    pub downloads: u64,
}

impl From<Asset> for AssetView {
    fn from(asset: Asset) -> Self {
        Self {
            id: asset.id,
            name: asset.name,
            public: asset.public,
            owner_id: asset.owner_id,
            downloads: asset.downloads,
        }
    }
}

/// Per-file result of a successful upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    pub link: String,
}

/// Result of an upload batch: `{file}` for exactly one file, `{files}` otherwise.
#[derive(Serialize, Debug, PartialEq)]
pub enum UploadOutcome {
    #[serde(rename = "file")]
    Single(UploadedFile),
    #[serde(rename = "files")]
    Many(Vec<UploadedFile>),
}

impl UploadOutcome {
    pub fn from_files(mut files: Vec<UploadedFile>) -> Self {
        if files.len() == 1 {
            Self::Single(files.remove(0))
        } else {
            Self::Many(files)
        }
    }

    pub fn files(&self) -> &[UploadedFile] {
        match self {
            Self::Single(file) => std::slice::from_ref(file),
            Self::Many(files) => files,
        }
    }
}
