use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{RecordPredicate, Store};
use crate::error::StoreError;

/// In-process store used by tests and dry runs. Survives only as long as the value does.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|records| records.get(id)).cloned())
    }

    async fn put(&self, collection: &str, id: &str, value: Value) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|records| records.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn query(&self, collection: &str, predicate: RecordPredicate<'_>) -> Result<Vec<(String, Value)>, StoreError> {
        let collections = self.collections.read().await;
        let rows = match collections.get(collection) {
            Some(records) => records
                .iter()
                .filter(|(_, value)| predicate(value))
                .map(|(id, value)| (id.clone(), value.clone()))
                .collect(),
            None => Vec::new(),
        };
        Ok(rows)
    }
}
