// src/store/file.rs - One-JSON-file-per-record store

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{validate_id, RecordPredicate, Store};
use crate::error::StoreError;

/// Durable store laid out as `<root>/<collection>/<id>.json`.
///
/// Writes land in a temp file that is renamed over the record, so a crash never
/// leaves a half-written record behind.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!("Opened JSON file store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, StoreError> {
        validate_id(collection)?;
        Ok(self.root.join(collection))
    }

    fn record_path(&self, collection: &str, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.collection_dir(collection)?.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let path = self.record_path(collection, id)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, collection: &str, id: &str, value: Value) -> Result<(), StoreError> {
        let path = self.record_path(collection, id)?;
        let dir = self.collection_dir(collection)?;
        fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4()));
        let content = serde_json::to_vec_pretty(&value)?;
        fs::write(&tmp, content).await?;

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let path = self.record_path(collection, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn query(&self, collection: &str, predicate: RecordPredicate<'_>) -> Result<Vec<(String, Value)>, StoreError> {
        let dir = self.collection_dir(collection)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut rows = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let id = match (path.extension().and_then(|e| e.to_str()), path.file_stem().and_then(|s| s.to_str())) {
                (Some("json"), Some(stem)) if !stem.starts_with('.') => stem.to_string(),
                _ => continue,
            };

            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                // Deleted between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            match serde_json::from_str::<Value>(&content) {
                Ok(value) => {
                    if predicate(&value) {
                        rows.push((id, value));
                    }
                }
                Err(e) => warn!("Skipping corrupt record {}: {}", path.display(), e),
            }
        }

        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = tempdir().unwrap();

        {
            let store = JsonFileStore::open(temp_dir.path()).await.unwrap();
            store.put("actions", "a1", json!({"end": 10})).await.unwrap();
            store.put("actions", "a2", json!({"end": 20})).await.unwrap();
        }

        let reopened = JsonFileStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(reopened.get("actions", "a1").await.unwrap(), Some(json!({"end": 10})));

        let due = reopened
            .query("actions", &|v: &Value| v["end"].as_i64().map(|e| e <= 15).unwrap_or(false))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "a1");
    }

    #[tokio::test]
    async fn test_delete_and_missing_collection() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileStore::open(temp_dir.path()).await.unwrap();

        assert!(store.query("empty", &|_: &Value| true).await.unwrap().is_empty());
        assert!(!store.delete("empty", "nothing").await.unwrap());

        store.put("things", "x", json!(1)).await.unwrap();
        assert!(store.delete("things", "x").await.unwrap());
        assert_eq!(store.get("things", "x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_skipped() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileStore::open(temp_dir.path()).await.unwrap();
        store.put("things", "good", json!({"ok": true})).await.unwrap();
        fs::write(temp_dir.path().join("things").join("bad.json"), b"{not json").await.unwrap();

        let rows = store.query("things", &|_: &Value| true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "good");
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let temp_dir = tempdir().unwrap();
        let store = JsonFileStore::open(temp_dir.path()).await.unwrap();
        assert!(matches!(
            store.put("things", "../escape", json!(1)).await,
            Err(StoreError::InvalidId(_))
        ));
    }
}
