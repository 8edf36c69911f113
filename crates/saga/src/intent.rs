//! Write-ahead intent log.

use common::RunId;
use document_store::{Filter, IntentRecord, Result, StorageWorker, StorageWorkerExt};
use tracing::debug;

/// Reads and writes intent entries for one service.
///
/// An intent shares its `_id` with the record it protects and is written
/// before that record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentLog {
    collection: String,
    service: String,
}

impl IntentLog {
    pub fn new(collection: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            service: service.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Records the intent to write `target_id` into `target_collection`.
    ///
    /// An intent already present under the same id counts as recorded.
    /// Returns `false` in that case, since the entry belongs to an earlier run.
    pub async fn record<W: StorageWorker + ?Sized>(
        &self,
        worker: &W,
        run_id: RunId,
        target_id: &str,
        target_collection: &str,
    ) -> Result<bool> {
        let intent = IntentRecord::new(target_id, run_id, target_collection, &self.service);
        match worker.insert_record(&self.collection, &intent).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_duplicate_key() => {
                debug!(id = target_id, "Intent already recorded");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes the intent for `target_id`. Missing intents are not an error.
    pub async fn clear<W: StorageWorker + ?Sized>(
        &self,
        worker: &W,
        target_id: &str,
    ) -> Result<()> {
        worker.delete(&self.collection, target_id).await?;
        Ok(())
    }

    /// Returns every intent owned by this service.
    pub async fn pending<W: StorageWorker + ?Sized>(
        &self,
        worker: &W,
    ) -> Result<Vec<IntentRecord>> {
        worker
            .find_records(&self.collection, &Filter::by_service(&self.service))
            .await
    }
}
