use std::time::Duration;

use thiserror::Error;

use crate::store::Operation;

/// Errors that can occur when interacting with a document backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document with the same `_id` already exists in the collection.
    #[error("Duplicate key in collection {collection}: {id}")]
    DuplicateKey { collection: String, id: String },

    /// The storage engine could not be reached.
    #[error("Storage unreachable: {0}")]
    Connectivity(String),

    /// A storage call exceeded its deadline.
    #[error("Storage operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The deployment cannot run multi-document transactions.
    #[error("Multi-document transactions are not supported by this deployment")]
    TransactionsUnsupported,

    /// A document did not carry a string `_id`.
    #[error("Document in collection {collection} has no string _id")]
    MissingId { collection: String },

    /// Any other database driver error.
    #[error("Database error: {0}")]
    Database(#[source] mongodb::error::Error),

    /// A record could not be encoded as BSON.
    #[error("BSON serialization error: {0}")]
    BsonSerialization(#[from] bson::ser::Error),

    /// A stored document could not be decoded into a record.
    #[error("BSON deserialization error: {0}")]
    BsonDeserialization(#[from] bson::de::Error),

    /// Failure injected by a test double.
    #[error("Injected failure: {operation} on collection {collection}")]
    InjectedFailure {
        operation: Operation,
        collection: String,
    },
}

impl StoreError {
    /// Returns true for a duplicate `_id` on insert.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }

    /// Returns true when the storage engine was unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Connectivity(_))
    }
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
