use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::record::{EXPIRY_FIELD, document_id};
use crate::store::{DocumentBackend, PendingWrite, StorageWorker};
use crate::{Filter, Result, StoreError};

type CollectionMap = HashMap<String, BTreeMap<String, Document>>;

/// In-memory document store.
///
/// Behaves like the MongoDB backend for everything the token store relies
/// on: unique `_id` per collection, atomic batch inserts when transactions
/// are enabled, and expiry indexes whose reaper is driven explicitly through
/// [`InMemoryStore::purge_expired`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    collections: Arc<RwLock<CollectionMap>>,
    expiry_indexes: Arc<RwLock<BTreeSet<String>>>,
    transactions: bool,
}

impl InMemoryStore {
    /// Creates an empty store without transaction support.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that supports atomic batch inserts.
    pub fn with_transactions() -> Self {
        Self {
            transactions: true,
            ..Self::default()
        }
    }

    /// Returns the number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if the collection holds a document with this id.
    pub async fn contains(&self, collection: &str, id: &str) -> bool {
        self.collections
            .read()
            .await
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id))
    }

    /// Returns a copy of a stored document.
    pub async fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Returns true if an expiry index was created on the collection.
    pub async fn has_expiry_index(&self, collection: &str) -> bool {
        self.expiry_indexes.read().await.contains(collection)
    }

    /// Removes expired documents from every collection carrying an expiry
    /// index, the way the storage engine's background reaper would.
    ///
    /// Returns the number of removed documents.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let indexed = self.expiry_indexes.read().await.clone();
        let mut store = self.collections.write().await;
        let mut removed = 0;

        for name in indexed {
            if let Some(docs) = store.get_mut(&name) {
                let before = docs.len();
                docs.retain(|_, doc| match doc.get_datetime(EXPIRY_FIELD) {
                    Ok(expired_at) => expired_at.to_chrono() > now,
                    Err(_) => true,
                });
                removed += before - docs.len();
            }
        }

        removed
    }

    /// Clears all collections.
    pub async fn clear(&self) {
        self.collections.write().await.clear();
    }
}

#[async_trait]
impl StorageWorker for InMemoryStore {
    async fn insert(&self, collection: &str, document: Document) -> Result<()> {
        let id = document_id(collection, &document)?.to_string();
        let mut store = self.collections.write().await;
        let docs = store.entry(collection.to_string()).or_default();

        if docs.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }

        docs.insert(id, document);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let mut store = self.collections.write().await;
        Ok(store
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let store = self.collections.read().await;
        let Some(docs) = store.get(collection) else {
            return Ok(Vec::new());
        };

        if let Some(ref id) = filter.id {
            return Ok(docs
                .get(id)
                .filter(|doc| filter.matches(doc))
                .cloned()
                .into_iter()
                .collect());
        }

        Ok(docs
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DocumentBackend for InMemoryStore {
    fn supports_transactions(&self) -> bool {
        self.transactions
    }

    async fn insert_atomically(
        &self,
        writes: Vec<PendingWrite>,
        _timeout: Duration,
    ) -> Result<()> {
        if !self.transactions {
            return Err(StoreError::TransactionsUnsupported);
        }

        let mut store = self.collections.write().await;

        // Validate the whole batch before touching anything
        let mut batch: BTreeSet<(&str, &str)> = BTreeSet::new();
        for write in &writes {
            let id = document_id(&write.collection, &write.document)?;
            let taken = store
                .get(&write.collection)
                .is_some_and(|docs| docs.contains_key(id));
            if taken || !batch.insert((write.collection.as_str(), id)) {
                return Err(StoreError::DuplicateKey {
                    collection: write.collection.clone(),
                    id: id.to_string(),
                });
            }
        }

        for write in writes {
            let id = document_id(&write.collection, &write.document)?.to_string();
            store
                .entry(write.collection)
                .or_default()
                .insert(id, write.document);
        }

        Ok(())
    }

    async fn ensure_expiry_index(&self, collection: &str) -> Result<()> {
        self.expiry_indexes
            .write()
            .await
            .insert(collection.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
