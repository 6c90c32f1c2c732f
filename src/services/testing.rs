//! Test fixtures: real stores in temp directories, wrapped so tests can
//! inject failures and count calls.

use super::{
    asset_service::AssetService,
    blob_store::{Acl, BlobStore, BoxReader, DiskBlobStore},
    error::{StoreError, StoreResult},
    metadata_store::{MetadataStore, SqliteMetadataStore},
    staging::{StagedFile, Stager},
    user_registry::UserRegistry,
};
use crate::{models::asset::UploadOutcome, state::AppState};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    io,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;

fn injected() -> StoreError {
    StoreError::Io(io::Error::other("injected failure"))
}

pub struct FlakyBlobStore {
    inner: DiskBlobStore,
    puts: AtomicUsize,
    gets: AtomicUsize,
    put_budget: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl FlakyBlobStore {
    /// Let the next `n` puts succeed and fail every one after.
    pub fn fail_puts_after(&self, n: usize) {
        self.put_budget.store(n, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &str, body: BoxReader, acl: Acl) -> StoreResult<String> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let allowed = self
            .put_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(injected());
        }
        self.inner.put(key, body, acl).await
    }

    async fn get(&self, key: &str) -> StoreResult<BoxReader> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.delete(key).await
    }
}

pub struct FlakyMetadataStore {
    inner: SqliteMetadataStore,
    write_budget: AtomicUsize,
}

impl FlakyMetadataStore {
    /// Fail every `set`, `create` and `update` while `fail` holds.
    pub fn fail_writes(&self, fail: bool) {
        let budget = if fail { 0 } else { usize::MAX };
        self.write_budget.store(budget, Ordering::SeqCst);
    }

    /// Let the next `n` writes succeed and fail every one after.
    pub fn fail_writes_after(&self, n: usize) {
        self.write_budget.store(n, Ordering::SeqCst);
    }

    fn admit_write(&self) -> StoreResult<()> {
        self.write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                if left == usize::MAX {
                    Some(left)
                } else {
                    left.checked_sub(1)
                }
            })
            .map(|_| ())
            .map_err(|_| injected())
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, record: Value) -> StoreResult<()> {
        self.admit_write()?;
        self.inner.set(path, record).await
    }

    async fn create(&self, path: &str, record: Value) -> StoreResult<bool> {
        self.admit_write()?;
        self.inner.create(path, record).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()> {
        self.admit_write()?;
        self.inner.update(path, fields).await
    }

    async fn increment(&self, path: &str, field: &str) -> StoreResult<u64> {
        self.inner.increment(path, field).await
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        self.inner.delete(path).await
    }

    async fn list_children(&self, namespace: &str) -> StoreResult<BTreeMap<String, Value>> {
        self.inner.list_children(namespace).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

pub struct Harness {
    pub service: AssetService,
    pub registry: UserRegistry,
    pub blobs: Arc<FlakyBlobStore>,
    pub meta: Arc<FlakyMetadataStore>,
    pub stager: Stager,
    dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FlakyBlobStore {
            inner: DiskBlobStore::new(dir.path().join("blobs"), "http://blobs.test")
                .await
                .unwrap(),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            put_budget: AtomicUsize::new(usize::MAX),
            fail_deletes: AtomicBool::new(false),
        });
        let meta = Arc::new(FlakyMetadataStore {
            inner: SqliteMetadataStore::in_memory().await.unwrap(),
            write_budget: AtomicUsize::new(usize::MAX),
        });
        let service = AssetService::new(blobs.clone(), meta.clone());
        let registry = UserRegistry::new(meta.clone(), service.clone());
        let stager = Stager::new(dir.path().join("staging"), 1024 * 1024);
        Self {
            service,
            registry,
            blobs,
            meta,
            stager,
            dir,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            assets: self.service.clone(),
            users: self.registry.clone(),
            stager: self.stager.clone(),
        }
    }

    pub async fn stage(&self, name: &str, data: &'static [u8]) -> StagedFile {
        let chunks = futures::stream::iter([Ok::<_, io::Error>(Bytes::from_static(data))]);
        self.stager.stage(name, chunks).await.unwrap()
    }

    /// Upload a single anonymous file and return its id.
    pub async fn upload_one(&self, name: &str) -> String {
        let staged = self.stage(name, b"data").await;
        match self.service.upload(vec![staged], None).await.unwrap() {
            UploadOutcome::Single(file) => file.id,
            UploadOutcome::Many(_) => unreachable!("one file in, one file out"),
        }
    }

    pub fn staging_entries(&self) -> usize {
        count_files(&self.dir.path().join("staging"))
    }

    pub fn blob_files(&self) -> usize {
        count_files(&self.dir.path().join("blobs"))
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() { count_files(&path) } else { 1 }
        })
        .sum()
}
