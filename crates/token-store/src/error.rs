//! Token store error types.

use document_store::StoreError;
use saga::SagaError;
use thiserror::Error;

/// Errors returned by the token and client stores.
#[derive(Debug, Error)]
pub enum TokenStoreError {
    /// No record matches the key. `kind` names what was looked up.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// The grant cannot be stored as given.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The saga failed and was compensated.
    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    /// Storage error outside the saga.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// A token payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configuration cannot be used.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TokenStoreError {
    pub(crate) fn not_found(kind: &'static str, key: &str) -> Self {
        TokenStoreError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Returns true for a lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TokenStoreError::NotFound { .. })
    }

    /// Returns true when the storage engine was unreachable.
    pub fn is_connectivity(&self) -> bool {
        match self {
            TokenStoreError::Store(e) => e.is_connectivity(),
            TokenStoreError::Saga(SagaError::Store(e))
            | TokenStoreError::Saga(SagaError::StepFailed { source: e, .. }) => {
                e.is_connectivity()
            }
            _ => false,
        }
    }
}

/// Convenience type alias for token store results.
pub type Result<T> = std::result::Result<T, TokenStoreError>;
