// src/store/mod.rs - Durable key/record store abstraction

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::StoreError;

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Predicate used to select records in [`Store::query`]
pub type RecordPredicate<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

/// A durable record store reachable by collection and id.
///
/// Every method is one independent operation; implementations must make each
/// `put` and `delete` atomic for its single record and must never hold locks
/// across calls.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    async fn put(&self, collection: &str, id: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// All records of a collection matching the predicate
    async fn query(&self, collection: &str, predicate: RecordPredicate<'_>) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Typed view over one collection of a [`Store`]
pub struct Collection<T> {
    store: Arc<dyn Store>,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: Arc<dyn Store>, name: &'static str) -> Self {
        Self { store, name, _marker: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(self.name, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, id: &str, record: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.store.put(self.name, id, value).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.store.delete(self.name, id).await
    }

    /// Records matching a typed predicate. Records that do not decode as `T` never match.
    pub async fn query<F>(&self, predicate: F) -> Result<Vec<T>, StoreError>
    where
        F: Fn(&T) -> bool + Send + Sync,
    {
        let matcher = |value: &Value| T::deserialize(value).map(|record| predicate(&record)).unwrap_or(false);
        let rows = self.store.query(self.name, &matcher).await?;

        rows.into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }

    pub async fn all(&self) -> Result<Vec<T>, StoreError> {
        self.query(|_| true).await
    }
}

/// Ids and collection names end up in file paths, so keep them to a safe alphabet
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        owner: u64,
        text: String,
    }

    #[tokio::test]
    async fn test_typed_collection_operations() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let notes: Collection<Note> = Collection::new(store, "notes");

        notes.put("a", &Note { owner: 1, text: "first".into() }).await.unwrap();
        notes.put("b", &Note { owner: 2, text: "second".into() }).await.unwrap();
        notes.put("c", &Note { owner: 1, text: "third".into() }).await.unwrap();

        assert_eq!(notes.get("b").await.unwrap().unwrap().text, "second");
        assert!(notes.get("missing").await.unwrap().is_none());

        let owned = notes.query(|n| n.owner == 1).await.unwrap();
        assert_eq!(owned.len(), 2);

        assert!(notes.delete("a").await.unwrap());
        assert!(!notes.delete("a").await.unwrap());
        assert_eq!(notes.all().await.unwrap().len(), 2);
    }

    #[test]
    fn test_id_validation() {
        assert!(validate_id("7-42").is_ok());
        assert!(validate_id("0b3e1c52-8e3d-4a44-9a8e-2f9d0f3c4b1a").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("a/b").is_err());
    }
}
