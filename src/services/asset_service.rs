//! AssetService: the lifecycle of an uploaded image across the two stores.
//!
//! Bytes live in a [`BlobStore`], records in a [`MetadataStore`]. There is no
//! transaction spanning both, so every operation runs its steps in a fixed
//! order chosen so that a failure can only leave an orphaned blob behind,
//! never a record pointing at deleted content:
//!
//! - upload: validate → stage → put blob → release staging → write record
//! - delete: read record → delete record → delete blob
//! - download: read record → check visibility → count → open blob
//!
//! Asset ids are short and random and are not checked for collisions.

use super::{
    blob_store::{Acl, BlobStore, BoxReader},
    error::{ServiceError, ServiceResult, StoreError, StoreResult},
    ids::generate_id,
    metadata_store::{self, MetadataStore},
    staging::StagedFile,
};
use crate::models::{
    asset::{
        ALLOWED_EXTENSIONS, ASSET_NAMESPACE, Asset, AssetView, UploadOutcome, UploadedFile,
        blob_key, download_link, record_path,
    },
    visibility::parse_public,
};
use serde_json::{Map, Value};
use std::{path::Path, sync::Arc};
use tracing::{info, instrument, warn};

/// Most files accepted in one upload call.
pub const MAX_FILES_PER_UPLOAD: usize = 5;

/// A readable blob plus the name it should be saved under.
pub struct Download {
    pub name: String,
    pub downloads: u64,
    pub body: BoxReader,
}

pub fn no_images() -> ServiceError {
    ServiceError::Validation("No images provided.".into())
}

pub fn too_many_files() -> ServiceError {
    ServiceError::Validation(format!(
        "Too many files; at most {MAX_FILES_PER_UPLOAD} may be uploaded at once."
    ))
}

/// Check that an uploaded filename is an allowed image and is safe to embed
/// in a blob key.
pub fn validate_file_name(name: &str) -> ServiceResult<()> {
    let allowed = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext));
    if !allowed {
        return Err(ServiceError::Validation("Only images are allowed.".into()));
    }

    if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
        return Err(ServiceError::Validation(format!(
            "Invalid file name \"{}\".",
            name.escape_debug()
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AssetService {
    blobs: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
}

impl AssetService {
    pub fn new(blobs: Arc<dyn BlobStore>, meta: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, meta }
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        &*self.blobs
    }

    pub fn metadata(&self) -> &dyn MetadataStore {
        &*self.meta
    }

    /// Store a batch of staged files, in order, attributed to `owner_id`.
    ///
    /// Every name is validated before any storage I/O. The first storage
    /// failure stops the batch: files after it are never attempted (their
    /// staging is discarded) and files before it stay committed.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn upload(
        &self,
        files: Vec<StagedFile>,
        owner_id: Option<&str>,
    ) -> ServiceResult<UploadOutcome> {
        if files.is_empty() {
            return Err(no_images());
        }
        if files.len() > MAX_FILES_PER_UPLOAD {
            return Err(too_many_files());
        }
        for file in &files {
            validate_file_name(file.name())?;
        }

        let mut committed = Vec::with_capacity(files.len());
        for staged in files {
            let name = staged.name().to_string();
            match self.upload_one(staged, owner_id).await {
                Ok(file) => committed.push(file),
                Err(source) => {
                    warn!(
                        name = %name,
                        committed = committed.len(),
                        "upload batch stopped: {}",
                        source
                    );
                    return Err(ServiceError::Upload {
                        name,
                        committed,
                        source,
                    });
                }
            }
        }

        Ok(UploadOutcome::from_files(committed))
    }

    async fn upload_one(
        &self,
        staged: StagedFile,
        owner_id: Option<&str>,
    ) -> StoreResult<UploadedFile> {
        let id = generate_id();
        let name = staged.name().to_string();
        let key = blob_key(&id, &name);

        let body: BoxReader = Box::new(staged.open().await?);
        let link = self.blobs.put(&key, body, Acl::PublicRead).await?;

        if let Err(err) = staged.release().await {
            warn!(key = %key, "failed to release staged upload: {}", err);
        }

        let asset = Asset::new(id.clone(), link, name.clone(), owner_id.map(str::to_string));
        if let Err(err) = self
            .meta
            .set(&record_path(&id), serde_json::to_value(&asset)?)
            .await
        {
            warn!(id = %id, key = %key, "record write failed, blob left orphaned: {}", err);
            return Err(err);
        }

        info!(id = %id, name = %name, owner = ?owner_id, "stored asset");
        Ok(UploadedFile {
            link: download_link(&id),
            id,
            name,
        })
    }

    async fn fetch_asset(&self, id: &str) -> ServiceResult<Asset> {
        metadata_store::fetch::<Asset>(&*self.meta, &record_path(id))
            .await?
            .ok_or_else(|| ServiceError::file_not_found(id))
    }

    /// A single asset record, without its direct link.
    pub async fn get_asset(&self, id: &str) -> ServiceResult<AssetView> {
        self.fetch_asset(id).await.map(AssetView::from)
    }

    /// Every public asset, in store order.
    pub async fn list_assets(&self) -> ServiceResult<Vec<AssetView>> {
        let assets = metadata_store::fetch_all::<Asset>(&*self.meta, ASSET_NAMESPACE).await?;
        Ok(assets
            .into_iter()
            .filter(|asset| asset.public)
            .map(AssetView::from)
            .collect())
    }

    /// Every public asset owned by `owner_id`. Scans all assets.
    pub async fn list_owned_by(&self, owner_id: &str) -> ServiceResult<Vec<AssetView>> {
        let mut assets = self.list_assets().await?;
        assets.retain(|asset| asset.owner_id.as_deref() == Some(owner_id));
        Ok(assets)
    }

    /// Set the `public` flag. `requested` absent or `null` means public.
    #[instrument(skip(self))]
    pub async fn set_visibility(&self, id: &str, requested: Option<&Value>) -> ServiceResult<()> {
        self.fetch_asset(id).await?;
        let public = parse_public(requested)?;

        let mut fields = Map::new();
        fields.insert("public".into(), Value::Bool(public));
        self.meta.update(&record_path(id), fields).await?;

        info!(id, public, "changed visibility");
        Ok(())
    }

    /// Remove an asset: its record first, then its blob.
    ///
    /// If the blob cannot be deleted the record stays deleted and the call
    /// fails with [`ServiceError::PartialDelete`].
    #[instrument(skip(self))]
    pub async fn delete_asset(&self, id: &str) -> ServiceResult<()> {
        let asset = self.fetch_asset(id).await?;

        if !self.meta.delete(&record_path(id)).await? {
            // Deleted concurrently; the other caller owns the blob cleanup.
            return Err(ServiceError::file_not_found(id));
        }

        let key = asset.blob_key();
        match self.blobs.delete(&key).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %key, "blob was already missing"),
            Err(source) => {
                warn!(key = %key, "record deleted but blob remains: {}", source);
                return Err(ServiceError::PartialDelete {
                    id: id.to_string(),
                    source,
                });
            }
        }

        info!(id, "deleted asset");
        Ok(())
    }

    /// Open a public asset for download, counting the download.
    #[instrument(skip(self))]
    pub async fn download(&self, id: &str) -> ServiceResult<Download> {
        let asset = self.fetch_asset(id).await?;
        if !asset.public {
            return Err(ServiceError::Permission(format!(
                "Cannot download file \"{id}\": invalid permissions."
            )));
        }

        let downloads = self.meta.increment(&record_path(id), "downloads").await?;
        let body = self.blobs.get(&asset.blob_key()).await.map_err(|err| {
            if let StoreError::BlobNotFound(key) = &err {
                warn!(key = %key, "record exists but blob is missing");
            }
            err
        })?;

        Ok(Download {
            name: asset.name,
            downloads,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::Harness;
    use tokio::io::AsyncReadExt;

    #[test]
    fn only_image_extensions_pass() {
        for name in ["a.png", "a.jpg", "a.gif", "a.jpeg", "my.photo.png"] {
            assert!(validate_file_name(name).is_ok(), "{name}");
        }
        for name in ["a.PNG", "a.txt", "png", ".png", "a.png.exe", "a"] {
            let err = validate_file_name(name).unwrap_err();
            assert_eq!(err.to_string(), "Only images are allowed.", "{name}");
        }
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["../a.png", "dir/a.png", "dir\\a.png", "a\n.png"] {
            assert!(matches!(
                validate_file_name(name),
                Err(ServiceError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn repeated_dots_in_a_name_upload_fine() {
        let h = Harness::new().await;
        let outcome = h
            .service
            .upload(vec![h.stage("my..photo.png", b"png").await], None)
            .await
            .unwrap();

        let UploadOutcome::Single(file) = outcome else {
            panic!("expected a single file");
        };
        assert_eq!(file.name, "my..photo.png");
        let mut download = h.service.download(&file.id).await.unwrap();
        let mut bytes = Vec::new();
        download.body.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"png");
    }

    #[tokio::test]
    async fn single_upload_is_public_with_zero_downloads() {
        let h = Harness::new().await;
        let outcome = h
            .service
            .upload(vec![h.stage("test.gif", b"GIF89a").await], None)
            .await
            .unwrap();

        let UploadOutcome::Single(file) = outcome else {
            panic!("expected a single-file outcome");
        };
        assert_eq!(file.name, "test.gif");
        assert_eq!(file.link, format!("./api/images/i/{}/download", file.id));

        let view = h.service.get_asset(&file.id).await.unwrap();
        assert!(view.public);
        assert_eq!(view.downloads, 0);
        assert_eq!(view.owner_id, None);

        let stored = h.meta.get(&record_path(&file.id)).await.unwrap().unwrap();
        assert!(stored["link"].as_str().unwrap().ends_with(&format!("images/{}-test.gif", file.id)));
        assert_eq!(h.staging_entries(), 0);
    }

    #[tokio::test]
    async fn multi_upload_returns_every_file_in_order() {
        let h = Harness::new().await;
        let files = vec![
            h.stage("a.png", b"1").await,
            h.stage("b.jpg", b"2").await,
            h.stage("c.jpeg", b"3").await,
        ];
        let outcome = h.service.upload(files, Some("owner1")).await.unwrap();
        let UploadOutcome::Many(files) = outcome else {
            panic!("expected a multi-file outcome");
        };
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.png", "b.jpg", "c.jpeg"]);

        let owned = h.service.list_owned_by("owner1").await.unwrap();
        assert_eq!(owned.len(), 3);
    }

    #[tokio::test]
    async fn bad_extension_touches_neither_store() {
        let h = Harness::new().await;
        let files = vec![h.stage("a.png", b"1").await, h.stage("notes.txt", b"2").await];
        let err = h.service.upload(files, None).await.unwrap_err();

        assert_eq!(err.to_string(), "Only images are allowed.");
        assert_eq!(h.blobs.puts(), 0);
        assert!(h.meta.list_children("images").await.unwrap().is_empty());
        assert_eq!(h.staging_entries(), 0);
    }

    #[tokio::test]
    async fn empty_and_oversized_batches_are_rejected() {
        let h = Harness::new().await;
        let err = h.service.upload(Vec::new(), None).await.unwrap_err();
        assert_eq!(err.to_string(), "No images provided.");

        let mut files = Vec::new();
        for i in 0..=MAX_FILES_PER_UPLOAD {
            files.push(h.stage(&format!("{i}.png"), b"x").await);
        }
        let err = h.service.upload(files, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(h.blobs.puts(), 0);
    }

    #[tokio::test]
    async fn blob_failure_stops_the_batch_and_keeps_earlier_files() {
        let h = Harness::new().await;
        h.blobs.fail_puts_after(1);
        let files = vec![
            h.stage("a.png", b"1").await,
            h.stage("b.png", b"2").await,
            h.stage("c.png", b"3").await,
        ];
        let err = h.service.upload(files, None).await.unwrap_err();

        let ServiceError::Upload { name, committed, .. } = err else {
            panic!("expected an upload error");
        };
        assert_eq!(name, "b.png");
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].name, "a.png");
        // c.png was never attempted.
        assert_eq!(h.blobs.puts(), 2);
        assert_eq!(h.service.list_assets().await.unwrap().len(), 1);
        assert_eq!(h.staging_entries(), 0);
    }

    #[tokio::test]
    async fn record_failure_orphans_the_blob_but_releases_staging() {
        let h = Harness::new().await;
        h.meta.fail_writes(true);
        let err = h
            .service
            .upload(vec![h.stage("a.png", b"1").await], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upload { .. }));
        assert_eq!(h.blobs.puts(), 1);
        assert_eq!(h.blob_files(), 1);
        assert_eq!(h.staging_entries(), 0);
    }

    #[tokio::test]
    async fn visibility_changes_only_the_flag() {
        let h = Harness::new().await;
        let id = h.upload_one("a.png").await;

        h.service
            .set_visibility(&id, Some(&Value::String("false".into())))
            .await
            .unwrap();
        let first = h.service.get_asset(&id).await.unwrap();
        let second = h.service.get_asset(&id).await.unwrap();
        assert!(!first.public);
        assert_eq!(first, second);
        assert_eq!(first.name, "a.png");
        assert!(h.service.list_assets().await.unwrap().is_empty());

        h.service.set_visibility(&id, None).await.unwrap();
        assert!(h.service.get_asset(&id).await.unwrap().public);
    }

    #[tokio::test]
    async fn visibility_rejects_bad_values_and_missing_assets() {
        let h = Harness::new().await;
        let id = h.upload_one("a.png").await;
        let err = h
            .service
            .set_visibility(&id, Some(&Value::from(1)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid \"public\" value.");

        let err = h.service.set_visibility("nope00", None).await.unwrap_err();
        assert_eq!(err.to_string(), "File with id \"nope00\" does not exist.");
    }

    #[tokio::test]
    async fn delete_removes_record_then_blob() {
        let h = Harness::new().await;
        let id = h.upload_one("a.png").await;
        h.service.delete_asset(&id).await.unwrap();

        assert!(matches!(
            h.service.get_asset(&id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(h.service.list_assets().await.unwrap().is_empty());
        assert_eq!(h.blob_files(), 0);

        let err = h.service.delete_asset(&id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_blob_delete_is_a_partial_failure() {
        let h = Harness::new().await;
        let id = h.upload_one("a.png").await;
        h.blobs.fail_deletes(true);

        let err = h.service.delete_asset(&id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PartialDelete { .. }));
        // The record is gone, the bytes are orphaned.
        assert!(h.service.get_asset(&id).await.is_err());
        assert_eq!(h.blob_files(), 1);
    }

    #[tokio::test]
    async fn download_counts_and_streams() {
        let h = Harness::new().await;
        let outcome = h
            .service
            .upload(vec![h.stage("cat.png", b"meow").await], None)
            .await
            .unwrap();
        let id = outcome.files()[0].id.clone();

        let mut download = h.service.download(&id).await.unwrap();
        assert_eq!(download.name, "cat.png");
        assert_eq!(download.downloads, 1);
        let mut buf = Vec::new();
        download.body.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"meow");

        h.service.download(&id).await.unwrap();
        assert_eq!(h.service.get_asset(&id).await.unwrap().downloads, 2);
    }

    #[tokio::test]
    async fn private_assets_cannot_be_downloaded() {
        let h = Harness::new().await;
        let id = h.upload_one("a.png").await;
        h.service
            .set_visibility(&id, Some(&Value::Bool(false)))
            .await
            .unwrap();

        let err = h.service.download(&id).await.err().unwrap();
        assert!(matches!(err, ServiceError::Permission(_)));
        assert_eq!(
            err.to_string(),
            format!("Cannot download file \"{id}\": invalid permissions.")
        );
        assert_eq!(h.service.get_asset(&id).await.unwrap().downloads, 0);
        assert_eq!(h.blobs.gets(), 0);
    }

    #[tokio::test]
    async fn concurrent_downloads_are_all_counted() {
        let h = Harness::new().await;
        let id = h.upload_one("a.png").await;
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let service = h.service.clone();
                let id = id.clone();
                tokio::spawn(async move { service.download(&id).await.map(|d| d.downloads) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(h.service.get_asset(&id).await.unwrap().downloads, 10);
    }
}
