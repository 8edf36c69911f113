use std::time::Duration;

use async_trait::async_trait;
use bson::Document;

use crate::record::{ID_FIELD, Record};
use crate::{Filter, Result};

/// The primitive operations a [`StorageWorker`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Delete,
    Find,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Delete => "delete",
            Operation::Find => "find",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive document operations against one named collection per call.
///
/// A worker carries no transaction logic: every call stands on its own. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StorageWorker: Send + Sync {
    /// Inserts a document if no document with the same `_id` exists.
    ///
    /// Fails with `DuplicateKey` when the id is already taken.
    async fn insert(&self, collection: &str, document: Document) -> Result<()>;

    /// Deletes the document with the given `_id`.
    ///
    /// Returns whether a document was removed. A missing id is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Returns every document matching the filter.
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;
}

/// Extension trait providing typed helpers over raw documents.
#[async_trait]
pub trait StorageWorkerExt: StorageWorker {
    /// Encodes and inserts a record.
    async fn insert_record<R: Record>(&self, collection: &str, record: &R) -> Result<()> {
        self.insert(collection, record.to_document()?).await
    }

    /// Finds and decodes every record matching the filter.
    async fn find_records<R: Record>(&self, collection: &str, filter: &Filter) -> Result<Vec<R>> {
        self.find(collection, filter)
            .await?
            .into_iter()
            .map(R::from_document)
            .collect()
    }

    /// Finds a single record by primary key.
    async fn find_by_id<R: Record>(&self, collection: &str, id: &str) -> Result<Option<R>> {
        let mut documents = self.find(collection, &Filter::by_id(id)).await?;
        match documents.pop() {
            Some(document) => Ok(Some(R::from_document(document)?)),
            None => Ok(None),
        }
    }
}

// Blanket implementation for all StorageWorker implementations
impl<T: StorageWorker + ?Sized> StorageWorkerExt for T {}

/// A document queued for an atomic multi-collection insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub collection: String,
    pub document: Document,
}

impl PendingWrite {
    /// Encodes a record destined for `collection`.
    pub fn new<R: Record>(collection: impl Into<String>, record: &R) -> Result<Self> {
        Ok(Self {
            collection: collection.into(),
            document: record.to_document()?,
        })
    }

    /// Returns the document's `_id`, or an empty string if it has none.
    pub fn id(&self) -> &str {
        self.document.get_str(ID_FIELD).unwrap_or_default()
    }
}

/// A full storage backend: the worker primitives plus the capabilities the
/// token store needs outside the saga.
#[async_trait]
pub trait DocumentBackend: StorageWorker {
    /// Returns true if the deployment can run multi-document transactions.
    fn supports_transactions(&self) -> bool;

    /// Inserts every write inside one transaction.
    ///
    /// Either all documents become visible or none do. `timeout` bounds the
    /// total wall time of the transaction.
    async fn insert_atomically(&self, writes: Vec<PendingWrite>, timeout: Duration)
    -> Result<()>;

    /// Ensures the collection's expiry field is indexed for automatic removal.
    async fn ensure_expiry_index(&self, collection: &str) -> Result<()>;

    /// Checks that the storage engine is reachable.
    async fn ping(&self) -> Result<()>;
}
