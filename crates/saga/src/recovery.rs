//! Startup repair of interrupted sagas.

use document_store::{Collections, StorageWorker};

use crate::error::Result;
use crate::intent::IntentLog;

/// Outcome of one recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Intents found for the service.
    pub scanned: usize,
    /// Intents whose target was removed and that were then cleared.
    pub repaired: usize,
    /// Intents left in place because a delete failed.
    pub failed: usize,
    /// Intents left in place because their target collection is unknown.
    pub skipped: usize,
}

impl SweepReport {
    /// Returns true if every scanned intent was repaired.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Rolls back every leftover intent of a service.
///
/// Intents are written before their targets, so a surviving intent always
/// marks a write that never became part of a committed grant. The target is
/// removed first and the intent only once the target is gone.
pub struct RecoverySweeper<'a, W: StorageWorker + ?Sized> {
    worker: &'a W,
    collections: &'a Collections,
    intents: &'a IntentLog,
}

impl<'a, W: StorageWorker + ?Sized> RecoverySweeper<'a, W> {
    pub fn new(worker: &'a W, collections: &'a Collections, intents: &'a IntentLog) -> Self {
        Self {
            worker,
            collections,
            intents,
        }
    }

    fn is_target_collection(&self, name: &str) -> bool {
        name == self.collections.basic || self.collections.is_index(name)
    }

    /// Scans the intent log and repairs every entry it can.
    ///
    /// Only a failure to read the intent log is returned as an error; failures
    /// on individual intents are counted in the report and retried on the
    /// next sweep.
    #[tracing::instrument(skip(self), fields(service = %self.intents.service()))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let pending = self.intents.pending(self.worker).await?;
        let mut report = SweepReport::default();

        for intent in pending {
            report.scanned += 1;

            if !self.is_target_collection(&intent.collection) {
                tracing::warn!(
                    id = %intent.id,
                    collection = %intent.collection,
                    "intent targets an unknown collection, leaving it in place"
                );
                report.skipped += 1;
                continue;
            }

            if let Err(e) = self.worker.delete(&intent.collection, &intent.id).await {
                tracing::warn!(
                    collection = %intent.collection,
                    txn_id = %intent.txn_id,
                    error = %e,
                    "failed to remove target of abandoned intent"
                );
                report.failed += 1;
                continue;
            }

            if let Err(e) = self.intents.clear(self.worker, &intent.id).await {
                tracing::warn!(
                    txn_id = %intent.txn_id,
                    error = %e,
                    "failed to clear abandoned intent"
                );
                report.failed += 1;
                continue;
            }

            tracing::debug!(
                collection = %intent.collection,
                txn_id = %intent.txn_id,
                "rolled back abandoned intent"
            );
            metrics::counter!("recovery_intents_repaired_total").increment(1);
            report.repaired += 1;
        }

        tracing::info!(
            scanned = report.scanned,
            repaired = report.repaired,
            failed = report.failed,
            skipped = report.skipped,
            "recovery sweep finished"
        );

        Ok(report)
    }
}
