//! A [`StorageWorker`] decorator that records every call and can inject
//! failures, used to assert on the exact sequence of storage operations.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bson::Document;

use crate::record::ID_FIELD;
use crate::store::{DocumentBackend, Operation, PendingWrite, StorageWorker};
use crate::{Filter, Result, StoreError};

/// One recorded storage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub collection: String,
    /// The `_id` the call targeted, if any.
    pub id: Option<String>,
}

impl Call {
    pub fn new(operation: Operation, collection: impl Into<String>, id: Option<&str>) -> Self {
        Self {
            operation,
            collection: collection.into(),
            id: id.map(str::to_string),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared, ordered log of storage calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    /// Returns a snapshot of every call in order.
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Returns `(operation, collection)` pairs in call order.
    pub fn operations(&self) -> Vec<(Operation, String)> {
        lock(&self.calls)
            .iter()
            .map(|c| (c.operation, c.collection.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.calls).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: Operation,
    collection: String,
    /// Fail only the nth matching call (1-based), or every one when `None`.
    nth: Option<usize>,
    seen: usize,
}

/// Describes which storage calls should fail.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    rules: Arc<Mutex<Vec<FailureRule>>>,
}

impl FailurePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every `operation` on `collection`.
    pub fn fail(&self, operation: Operation, collection: impl Into<String>) {
        lock(&self.rules).push(FailureRule {
            operation,
            collection: collection.into(),
            nth: None,
            seen: 0,
        });
    }

    /// Fails only the `n`th (1-based) `operation` on `collection`.
    pub fn fail_nth(&self, operation: Operation, collection: impl Into<String>, n: usize) {
        lock(&self.rules).push(FailureRule {
            operation,
            collection: collection.into(),
            nth: Some(n),
            seen: 0,
        });
    }

    /// Removes all rules.
    pub fn clear(&self) {
        lock(&self.rules).clear();
    }

    /// Counts the call against matching rules and returns the injected error,
    /// if any rule fires.
    pub fn check(&self, operation: Operation, collection: &str) -> Result<()> {
        let mut fire = false;
        for rule in lock(&self.rules).iter_mut() {
            if rule.operation != operation || rule.collection != collection {
                continue;
            }
            rule.seen += 1;
            match rule.nth {
                Some(n) if n == rule.seen => fire = true,
                None => fire = true,
                _ => {}
            }
        }

        if fire {
            return Err(StoreError::InjectedFailure {
                operation,
                collection: collection.to_string(),
            });
        }
        Ok(())
    }
}

/// Wraps a worker, recording each call before delegating to it.
///
/// Calls that hit a [`FailurePlan`] rule are recorded but never reach the
/// inner worker.
#[derive(Clone)]
pub struct RecordingWorker<W> {
    inner: W,
    log: CallLog,
    failures: FailurePlan,
}

impl<W> RecordingWorker<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            log: CallLog::new(),
            failures: FailurePlan::new(),
        }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn failures(&self) -> &FailurePlan {
        &self.failures
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }
}

#[async_trait]
impl<W: StorageWorker> StorageWorker for RecordingWorker<W> {
    async fn insert(&self, collection: &str, document: Document) -> Result<()> {
        let id = document.get_str(ID_FIELD).ok().map(str::to_string);
        self.log
            .record(Call::new(Operation::Insert, collection, id.as_deref()));
        self.failures.check(Operation::Insert, collection)?;
        self.inner.insert(collection, document).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.log.record(Call::new(Operation::Delete, collection, Some(id)));
        self.failures.check(Operation::Delete, collection)?;
        self.inner.delete(collection, id).await
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.log
            .record(Call::new(Operation::Find, collection, filter.id.as_deref()));
        self.failures.check(Operation::Find, collection)?;
        self.inner.find(collection, filter).await
    }
}

#[async_trait]
impl<W: DocumentBackend> DocumentBackend for RecordingWorker<W> {
    fn supports_transactions(&self) -> bool {
        self.inner.supports_transactions()
    }

    async fn insert_atomically(&self, writes: Vec<PendingWrite>, timeout: Duration) -> Result<()> {
        for write in &writes {
            self.log.record(Call::new(
                Operation::Insert,
                &write.collection,
                Some(write.id()),
            ));
        }
        for write in &writes {
            self.failures.check(Operation::Insert, &write.collection)?;
        }
        self.inner.insert_atomically(writes, timeout).await
    }

    async fn ensure_expiry_index(&self, collection: &str) -> Result<()> {
        self.inner.ensure_expiry_index(collection).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use bson::doc;

    #[tokio::test]
    async fn records_calls_in_order() {
        let worker = RecordingWorker::new(InMemoryStore::new());

        worker.insert("a", doc! { "_id": "1" }).await.unwrap();
        worker.find("a", &Filter::by_id("1")).await.unwrap();
        worker.delete("a", "1").await.unwrap();

        assert_eq!(
            worker.log().calls(),
            vec![
                Call::new(Operation::Insert, "a", Some("1")),
                Call::new(Operation::Find, "a", Some("1")),
                Call::new(Operation::Delete, "a", Some("1")),
            ]
        );
    }

    #[tokio::test]
    async fn injected_failure_skips_inner_worker() {
        let worker = RecordingWorker::new(InMemoryStore::new());
        worker.failures().fail(Operation::Insert, "a");

        let result = worker.insert("a", doc! { "_id": "1" }).await;

        assert!(matches!(result, Err(StoreError::InjectedFailure { .. })));
        assert_eq!(worker.log().len(), 1);
        assert_eq!(worker.inner().count("a").await, 0);
    }

    #[tokio::test]
    async fn fail_nth_only_fires_once() {
        let worker = RecordingWorker::new(InMemoryStore::new());
        worker.failures().fail_nth(Operation::Insert, "a", 2);

        assert!(worker.insert("a", doc! { "_id": "1" }).await.is_ok());
        assert!(worker.insert("a", doc! { "_id": "2" }).await.is_err());
        assert!(worker.insert("a", doc! { "_id": "3" }).await.is_ok());
        assert_eq!(worker.inner().count("a").await, 2);
    }

    #[tokio::test]
    async fn clearing_failures_restores_delegation() {
        let worker = RecordingWorker::new(InMemoryStore::new());
        worker.failures().fail(Operation::Delete, "a");
        assert!(worker.delete("a", "1").await.is_err());

        worker.failures().clear();
        assert!(!worker.delete("a", "1").await.unwrap());
    }
}
