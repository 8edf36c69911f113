//! Saga error types.

use document_store::StoreError;
use thiserror::Error;

use crate::step::{Phase, SagaStep};

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A forward action failed; completed actions were compensated.
    #[error("Saga step '{step}' failed in {phase} phase on {collection}: {source}")]
    StepFailed {
        step: SagaStep,
        phase: Phase,
        collection: String,
        #[source]
        source: StoreError,
    },

    /// Undoing a completed action failed. Logged, never returned to callers.
    #[error("Compensation of step '{step}' failed deleting {id} from {collection}: {source}")]
    CompensationFailed {
        step: SagaStep,
        collection: String,
        id: String,
        #[source]
        source: StoreError,
    },

    /// Storage error outside a saga step.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl SagaError {
    /// Returns the failing step, if this error is tied to one.
    pub fn step(&self) -> Option<SagaStep> {
        match self {
            SagaError::StepFailed { step, .. } | SagaError::CompensationFailed { step, .. } => {
                Some(*step)
            }
            SagaError::Store(_) => None,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
