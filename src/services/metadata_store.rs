//! Path-addressed JSON document store for asset and user records.
//!
//! Paths have the shape `{namespace}/{key}` (`images/abc123`, `users/x9y8z7`).
//! [`SqliteMetadataStore`] keeps one row per document in the `documents` table.

use super::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, warn};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Write a whole record, replacing any existing one.
    async fn set(&self, path: &str, record: Value) -> StoreResult<()>;

    /// Write a record only if the path is free. Returns `false` when taken.
    async fn create(&self, path: &str, record: Value) -> StoreResult<bool>;

    /// Merge `fields` into an existing record, leaving other fields untouched.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()>;

    /// Atomically add one to a numeric field (absent counts as 0) and return
    /// the new value.
    async fn increment(&self, path: &str, field: &str) -> StoreResult<u64>;

    /// Returns `false` if nothing was stored at `path`.
    async fn delete(&self, path: &str) -> StoreResult<bool>;

    /// Every record in `namespace`, keyed by its key.
    async fn list_children(&self, namespace: &str) -> StoreResult<BTreeMap<String, Value>>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Fetch and deserialize a single record.
pub async fn fetch<T: DeserializeOwned>(
    store: &dyn MetadataStore,
    path: &str,
) -> StoreResult<Option<T>> {
    match store.get(path).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                path: path.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Deserialize every record in a namespace. Records that do not fit `T` are
/// logged and skipped.
pub async fn fetch_all<T: DeserializeOwned>(
    store: &dyn MetadataStore,
    namespace: &str,
) -> StoreResult<Vec<T>> {
    let children = store.list_children(namespace).await?;
    let mut records = Vec::with_capacity(children.len());
    for (key, value) in children {
        match serde_json::from_value(value) {
            Ok(record) => records.push(record),
            Err(err) => warn!(namespace, key = %key, "skipping malformed record: {}", err),
        }
    }
    Ok(records)
}

/// Split `namespace/key`, rejecting empty halves.
fn split_path(path: &str) -> StoreResult<(&str, &str)> {
    match path.split_once('/') {
        Some((namespace, key)) if !namespace.is_empty() && !key.is_empty() => {
            Ok((namespace, key))
        }
        _ => Err(StoreError::InvalidPath(path.to_string())),
    }
}

fn parse_body(path: &str, body: &str) -> StoreResult<Value> {
    serde_json::from_str(body).map_err(|source| StoreError::Malformed {
        path: path.to_string(),
        source,
    })
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// A migrated store over a private in-memory database.
    #[cfg(test)]
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(Arc::new(pool));
        store.migrate().await?;
        Ok(store)
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        let (namespace, key) = split_path(path)?;
        let body = sqlx::query_scalar::<_, String>(
            "SELECT body FROM documents WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;

        body.map(|body| parse_body(path, &body)).transpose()
    }

    async fn set(&self, path: &str, record: Value) -> StoreResult<()> {
        let (namespace, key) = split_path(path)?;
        sqlx::query(
            "INSERT INTO documents (namespace, key, body, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at",
        )
        .bind(namespace)
        .bind(key)
        .bind(serde_json::to_string(&record)?)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn create(&self, path: &str, record: Value) -> StoreResult<bool> {
        let (namespace, key) = split_path(path)?;
        let result = sqlx::query(
            "INSERT INTO documents (namespace, key, body, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(namespace, key) DO NOTHING",
        )
        .bind(namespace)
        .bind(key)
        .bind(serde_json::to_string(&record)?)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()> {
        let (namespace, key) = split_path(path)?;
        let result = sqlx::query(
            "UPDATE documents SET body = json_patch(body, ?), updated_at = ?
             WHERE namespace = ? AND key = ?",
        )
        .bind(serde_json::to_string(&fields)?)
        .bind(Utc::now())
        .bind(namespace)
        .bind(key)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound(path.to_string()));
        }
        Ok(())
    }

    async fn increment(&self, path: &str, field: &str) -> StoreResult<u64> {
        let (namespace, key) = split_path(path)?;
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(StoreError::InvalidPath(format!("{path}#{field}")));
        }
        let json_path = format!("$.{field}");

        let value = sqlx::query_scalar::<_, i64>(
            "UPDATE documents
             SET body = json_set(body, ?, COALESCE(json_extract(body, ?), 0) + 1),
                 updated_at = ?
             WHERE namespace = ? AND key = ?
             RETURNING json_extract(body, ?)",
        )
        .bind(&json_path)
        .bind(&json_path)
        .bind(Utc::now())
        .bind(namespace)
        .bind(key)
        .bind(&json_path)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::RecordNotFound(path.to_string()))?;

        Ok(value.max(0) as u64)
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        let (namespace, key) = split_path(path)?;
        let result = sqlx::query("DELETE FROM documents WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_children(&self, namespace: &str) -> StoreResult<BTreeMap<String, Value>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, body FROM documents WHERE namespace = ?",
        )
        .bind(namespace)
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter()
            .map(|(key, body)| {
                let value = parse_body(&format!("{namespace}/{key}"), &body)?;
                Ok((key, value))
            })
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        debug!(one, "metadata store ping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.set("images/a1", json!({"id": "a1", "downloads": 0})).await.unwrap();
        let value = store.get("images/a1").await.unwrap().unwrap();
        assert_eq!(value, json!({"id": "a1", "downloads": 0}));
        assert!(store.get("images/zz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_refuses_taken_paths() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        assert!(store.create("usernames/bob", json!({"user_id": "1"})).await.unwrap());
        assert!(!store.create("usernames/bob", json!({"user_id": "2"})).await.unwrap());
        let value = store.get("usernames/bob").await.unwrap().unwrap();
        assert_eq!(value["user_id"], "1");
    }

    #[tokio::test]
    async fn update_touches_only_given_fields() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store
            .set("images/a1", json!({"id": "a1", "name": "a.png", "public": true}))
            .await
            .unwrap();
        let mut fields = Map::new();
        fields.insert("public".into(), json!(false));
        store.update("images/a1", fields).await.unwrap();

        let value = store.get("images/a1").await.unwrap().unwrap();
        assert_eq!(value, json!({"id": "a1", "name": "a.png", "public": false}));
    }

    #[tokio::test]
    async fn update_of_missing_record_fails() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        let err = store.update("images/none", Map::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn increment_counts_from_missing_field() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.set("images/a1", json!({"id": "a1"})).await.unwrap();
        assert_eq!(store.increment("images/a1", "downloads").await.unwrap(), 1);
        assert_eq!(store.increment("images/a1", "downloads").await.unwrap(), 2);
        let value = store.get("images/a1").await.unwrap().unwrap();
        assert_eq!(value["downloads"], 2);

        let err = store.increment("images/none", "downloads").await.unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound(_)));
        let err = store.increment("images/a1", "x') --").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn list_children_is_scoped_to_namespace() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.set("images/a", json!({"id": "a"})).await.unwrap();
        store.set("images/b", json!({"id": "b"})).await.unwrap();
        store.set("users/a", json!({"id": "a"})).await.unwrap();

        let images = store.list_children("images").await.unwrap();
        assert_eq!(images.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(store.list_children("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.set("images/a", json!({})).await.unwrap();
        assert!(store.delete("images/a").await.unwrap());
        assert!(!store.delete("images/a").await.unwrap());
    }

    #[tokio::test]
    async fn bad_paths_are_rejected() {
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        for path in ["images", "/a", "images/", ""] {
            let err = store.get(path).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidPath(_)), "{path:?}");
        }
    }

    #[tokio::test]
    async fn typed_listing_skips_malformed_records() {
        #[derive(serde::Deserialize)]
        struct Named {
            #[allow(dead_code)]
            name: String,
        }
        let store = SqliteMetadataStore::in_memory().await.unwrap();
        store.set("things/a", json!({"name": "ok"})).await.unwrap();
        store.set("things/b", json!({"other": 1})).await.unwrap();
        let named: Vec<Named> = fetch_all(&store, "things").await.unwrap();
        assert_eq!(named.len(), 1);
    }
}
