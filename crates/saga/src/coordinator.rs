//! Saga coordinator for multi-collection token writes.

use std::collections::HashSet;

use common::RunId;
use document_store::{
    BasicRecord, Collections, Document, Filter, IndexRecord, Record, StorageWorker, StoreError,
};

use crate::error::SagaError;
use crate::intent::IntentLog;
use crate::recovery::RecoverySweeper;
use crate::run::SagaRun;
use crate::step::{Action, Compensation, Phase, SagaStep};

/// The records one token grant writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaPlan {
    pub basic: BasicRecord,
    pub access: IndexRecord,
    pub refresh: Option<IndexRecord>,
}

impl SagaPlan {
    pub fn new(basic: BasicRecord, access: IndexRecord) -> Self {
        Self {
            basic,
            access,
            refresh: None,
        }
    }

    pub fn with_refresh(mut self, refresh: IndexRecord) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Steps in execution order with the record each one writes.
    pub fn targets(&self) -> Vec<(SagaStep, Target<'_>)> {
        let mut targets = vec![
            (SagaStep::Basic, Target::Basic(&self.basic)),
            (SagaStep::Access, Target::Index(&self.access)),
        ];
        if let Some(ref refresh) = self.refresh {
            targets.push((SagaStep::Refresh, Target::Index(refresh)));
        }
        targets
    }

    /// Returns the id written by `step`, if the plan includes it.
    pub fn target_id(&self, step: SagaStep) -> Option<&str> {
        match step {
            SagaStep::Basic => Some(&self.basic.id),
            SagaStep::Access => Some(&self.access.id),
            SagaStep::Refresh => self.refresh.as_ref().map(|r| r.id.as_str()),
        }
    }
}

/// A record a step writes.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Basic(&'a BasicRecord),
    Index(&'a IndexRecord),
}

impl Target<'_> {
    pub fn id(&self) -> &str {
        match self {
            Target::Basic(record) => record.id(),
            Target::Index(record) => record.id(),
        }
    }

    fn to_document(self) -> document_store::Result<Document> {
        match self {
            Target::Basic(record) => record.to_document(),
            Target::Index(record) => record.to_document(),
        }
    }

    /// Returns true when `stored` is this grant's record: the same payload
    /// for a basic record, the same owning basic record for an index.
    fn is_same_grant(self, stored: Document) -> document_store::Result<bool> {
        Ok(match self {
            Target::Basic(record) => BasicRecord::from_document(stored)?.data == record.data,
            Target::Index(record) => {
                IndexRecord::from_document(stored)?.basic_id == record.basic_id
            }
        })
    }
}

/// How a forward action was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Written,
    /// The record was already stored by an earlier attempt.
    Adopted,
}

/// Orchestrates the intent-then-write steps of a token grant.
///
/// Each step records an intent before writing its target. When an action
/// fails, every action already completed in this run is undone in reverse
/// order. Compensation is best-effort: failures are logged and whatever is
/// left behind is repaired by the [`RecoverySweeper`].
pub struct SagaCoordinator<W: StorageWorker> {
    worker: W,
    collections: Collections,
    intents: IntentLog,
}

impl<W: StorageWorker> SagaCoordinator<W> {
    /// Creates a coordinator whose intents are owned by `service`.
    pub fn new(worker: W, collections: Collections, service: impl Into<String>) -> Self {
        let intents = IntentLog::new(collections.intents.clone(), service);
        Self {
            worker,
            collections,
            intents,
        }
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    pub fn collections(&self) -> &Collections {
        &self.collections
    }

    pub fn intents(&self) -> &IntentLog {
        &self.intents
    }

    /// Returns a sweeper over the same worker and intent log.
    pub fn sweeper(&self) -> RecoverySweeper<'_, W> {
        RecoverySweeper::new(&self.worker, &self.collections, &self.intents)
    }

    fn collection_for(&self, step: SagaStep) -> &str {
        match step {
            SagaStep::Basic => &self.collections.basic,
            SagaStep::Access => &self.collections.access,
            SagaStep::Refresh => &self.collections.refresh,
        }
    }

    /// Executes the saga and returns the run id on success.
    ///
    /// On failure the error names the step, phase, and collection that
    /// failed; compensation has already run by the time it is returned.
    pub async fn execute(&self, plan: &SagaPlan) -> Result<RunId, SagaError> {
        self.run(plan).await.into_result()
    }

    /// Executes the saga and returns the full run record.
    #[tracing::instrument(
        skip(self, plan),
        fields(basic_id = %plan.basic.id, refresh = plan.refresh.is_some())
    )]
    pub async fn run(&self, plan: &SagaPlan) -> SagaRun {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();

        let mut run = SagaRun::new();
        run.start();

        let targets = plan.targets();
        for (step, target) in &targets {
            for phase in Phase::ORDER {
                let action = Action::new(*step, phase);
                tracing::debug!(run_id = %run.id(), %action, "saga action started");

                let source = match self.perform(run.id(), action, *target).await {
                    Ok(Outcome::Written) => {
                        run.record(action);
                        continue;
                    }
                    Ok(Outcome::Adopted) => {
                        run.record_adopted(action);
                        continue;
                    }
                    Err(source) => source,
                };

                let collection = match phase {
                    Phase::Intent => self.intents.collection(),
                    Phase::Write => self.collection_for(*step),
                };
                let error = SagaError::StepFailed {
                    step: *step,
                    phase,
                    collection: collection.to_string(),
                    source,
                };
                tracing::warn!(run_id = %run.id(), error = %error, "saga step failed");

                run.begin_compensation(error);
                self.compensate(&mut run, plan).await;
                run.finish();

                metrics::histogram!("saga_duration_seconds")
                    .record(saga_start.elapsed().as_secs_f64());
                metrics::counter!("saga_failed").increment(1);
                return run;
            }
        }

        // The basic intent goes last: while it exists a sweep rolls back the grant
        for (step, target) in targets.iter().rev() {
            if let Err(e) = self.intents.clear(&self.worker, target.id()).await {
                tracing::warn!(
                    run_id = %run.id(),
                    %step,
                    error = %e,
                    "failed to clear intent after successful saga"
                );
            }
        }

        run.finish();

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(run_id = %run.id(), duration, "saga completed successfully");

        run
    }

    async fn perform(
        &self,
        run_id: RunId,
        action: Action,
        target: Target<'_>,
    ) -> Result<Outcome, StoreError> {
        let collection = self.collection_for(action.step);
        match action.phase {
            Phase::Intent => {
                let recorded = self
                    .intents
                    .record(&self.worker, run_id, target.id(), collection)
                    .await?;
                Ok(if recorded {
                    Outcome::Written
                } else {
                    Outcome::Adopted
                })
            }
            Phase::Write => match self.worker.insert(collection, target.to_document()?).await {
                Ok(()) => Ok(Outcome::Written),
                Err(e) if e.is_duplicate_key() => {
                    let stored = self
                        .worker
                        .find(collection, &Filter::by_id(target.id()))
                        .await?;
                    let same_grant = match stored.into_iter().next() {
                        Some(document) => target.is_same_grant(document)?,
                        None => false,
                    };
                    if !same_grant {
                        tracing::warn!(%action, %collection, "id taken by another grant");
                        return Err(e);
                    }
                    tracing::debug!(%action, "target already written");
                    Ok(Outcome::Adopted)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Undoes completed actions in reverse order.
    #[tracing::instrument(skip(self, run, plan), fields(run_id = %run.id()))]
    async fn compensate(&self, run: &mut SagaRun, plan: &SagaPlan) {
        // Steps whose target could not be removed keep their intent
        let mut stuck: HashSet<SagaStep> = HashSet::new();

        let completed = run.completed().to_vec();
        let adopted = run.adopted().to_vec();
        for action in completed.iter().rev() {
            let compensation = action.compensation();
            let step = compensation.step();
            let Some(id) = plan.target_id(step) else {
                continue;
            };

            // Records this run did not write are left for the recovery sweep
            if adopted.contains(action) {
                if action.phase == Phase::Write {
                    stuck.insert(step);
                }
                tracing::debug!(%action, "leaving record written by an earlier attempt");
                continue;
            }

            let (collection, outcome) = match compensation {
                Compensation::DeleteTarget(_) => {
                    let collection = self.collection_for(step);
                    let outcome = self.worker.delete(collection, id).await.map(|_| ());
                    (collection, outcome)
                }
                Compensation::DeleteIntent(_) if stuck.contains(&step) => {
                    tracing::debug!(%step, "keeping intent for recovery sweep");
                    continue;
                }
                Compensation::DeleteIntent(_) => (
                    self.intents.collection(),
                    self.intents.clear(&self.worker, id).await,
                ),
            };

            match outcome {
                Ok(()) => run.record_compensation(compensation),
                Err(source) => {
                    let error = SagaError::CompensationFailed {
                        step,
                        collection: collection.to_string(),
                        id: id.to_string(),
                        source,
                    };
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::warn!(
                        error = %error,
                        "compensation failed, leaving state for recovery sweep"
                    );

                    run.record_compensation_failure();
                    if matches!(compensation, Compensation::DeleteTarget(_)) {
                        stuck.insert(step);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SagaState;
    use chrono::{Duration, Utc};
    use document_store::{Call, InMemoryStore, Operation, RecordingWorker, StorageWorkerExt};

    const SERVICE: &str = "test-service";

    fn collections() -> Collections {
        Collections::default()
    }

    type TestWorker = RecordingWorker<InMemoryStore>;

    fn setup() -> (SagaCoordinator<TestWorker>, TestWorker) {
        let worker = RecordingWorker::new(InMemoryStore::new());
        let coordinator = SagaCoordinator::new(worker.clone(), collections(), SERVICE);
        (coordinator, worker)
    }

    fn plan(with_refresh: bool) -> SagaPlan {
        let expires = Utc::now() + Duration::hours(1);
        let plan = SagaPlan::new(
            BasicRecord::new("b1", r#"{"ClientID":"c"}"#, expires),
            IndexRecord::new("A1", "b1", expires),
        );
        if with_refresh {
            plan.with_refresh(IndexRecord::new("R1", "b1", expires))
        } else {
            plan
        }
    }

    fn insert(collection: &str, id: &str) -> Call {
        Call::new(Operation::Insert, collection, Some(id))
    }

    fn delete(collection: &str, id: &str) -> Call {
        Call::new(Operation::Delete, collection, Some(id))
    }

    fn find(collection: &str, id: &str) -> Call {
        Call::new(Operation::Find, collection, Some(id))
    }

    #[tokio::test]
    async fn test_happy_path_with_refresh() {
        let (coordinator, worker) = setup();
        let c = collections();

        let run = coordinator.run(&plan(true)).await;

        assert_eq!(run.state(), SagaState::Completed);
        assert_eq!(run.completed().len(), 6);
        assert_eq!(
            worker.log().calls(),
            vec![
                insert(&c.intents, "b1"),
                insert(&c.basic, "b1"),
                insert(&c.intents, "A1"),
                insert(&c.access, "A1"),
                insert(&c.intents, "R1"),
                insert(&c.refresh, "R1"),
                delete(&c.intents, "R1"),
                delete(&c.intents, "A1"),
                delete(&c.intents, "b1"),
            ]
        );

        let store = worker.inner();
        assert!(store.contains(&c.basic, "b1").await);
        assert!(store.contains(&c.access, "A1").await);
        assert!(store.contains(&c.refresh, "R1").await);
        assert_eq!(store.count(&c.intents).await, 0);
    }

    #[tokio::test]
    async fn test_happy_path_without_refresh() {
        let (coordinator, worker) = setup();
        let c = collections();

        coordinator.execute(&plan(false)).await.unwrap();

        assert_eq!(
            worker.log().calls(),
            vec![
                insert(&c.intents, "b1"),
                insert(&c.basic, "b1"),
                insert(&c.intents, "A1"),
                insert(&c.access, "A1"),
                delete(&c.intents, "A1"),
                delete(&c.intents, "b1"),
            ]
        );
        assert_eq!(worker.inner().count(&c.refresh).await, 0);
    }

    #[tokio::test]
    async fn test_basic_intent_failure_needs_no_compensation() {
        let (coordinator, worker) = setup();
        let c = collections();
        worker.failures().fail_nth(Operation::Insert, &c.intents, 1);

        let run = coordinator.run(&plan(true)).await;

        assert_eq!(run.state(), SagaState::Failed);
        assert!(run.completed().is_empty());
        assert_eq!(worker.log().calls(), vec![insert(&c.intents, "b1")]);
        assert!(matches!(
            run.failure(),
            Some(SagaError::StepFailed {
                step: SagaStep::Basic,
                phase: Phase::Intent,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_basic_write_failure_clears_intent() {
        let (coordinator, worker) = setup();
        let c = collections();
        worker.failures().fail(Operation::Insert, &c.basic);

        let err = coordinator.execute(&plan(true)).await.unwrap_err();

        assert!(matches!(
            err,
            SagaError::StepFailed { step: SagaStep::Basic, phase: Phase::Write, ref collection, .. }
                if collection == &c.basic
        ));
        assert_eq!(
            worker.log().calls(),
            vec![
                insert(&c.intents, "b1"),
                insert(&c.basic, "b1"),
                delete(&c.intents, "b1"),
            ]
        );
        assert_eq!(worker.inner().count(&c.intents).await, 0);
    }

    #[tokio::test]
    async fn test_access_intent_failure_compensates_basic() {
        let (coordinator, worker) = setup();
        let c = collections();
        worker.failures().fail_nth(Operation::Insert, &c.intents, 2);

        let run = coordinator.run(&plan(true)).await;

        assert_eq!(run.state(), SagaState::Failed);
        assert_eq!(
            worker.log().calls(),
            vec![
                insert(&c.intents, "b1"),
                insert(&c.basic, "b1"),
                insert(&c.intents, "A1"),
                delete(&c.basic, "b1"),
                delete(&c.intents, "b1"),
            ]
        );
        assert_eq!(
            run.compensated(),
            &[
                Compensation::DeleteTarget(SagaStep::Basic),
                Compensation::DeleteIntent(SagaStep::Basic),
            ]
        );
        assert_eq!(worker.inner().count(&c.basic).await, 0);
        assert_eq!(worker.inner().count(&c.intents).await, 0);
    }

    #[tokio::test]
    async fn test_access_write_failure_compensates_everything() {
        let (coordinator, worker) = setup();
        let c = collections();
        worker.failures().fail(Operation::Insert, &c.access);

        let err = coordinator.execute(&plan(true)).await.unwrap_err();

        assert_eq!(err.step(), Some(SagaStep::Access));
        assert_eq!(
            worker.log().calls(),
            vec![
                insert(&c.intents, "b1"),
                insert(&c.basic, "b1"),
                insert(&c.intents, "A1"),
                insert(&c.access, "A1"),
                delete(&c.intents, "A1"),
                delete(&c.basic, "b1"),
                delete(&c.intents, "b1"),
            ]
        );
        let store = worker.inner();
        assert_eq!(store.count(&c.basic).await, 0);
        assert_eq!(store.count(&c.intents).await, 0);
    }

    #[tokio::test]
    async fn test_refresh_write_failure_compensates_access_index() {
        let (coordinator, worker) = setup();
        let c = collections();
        worker.failures().fail(Operation::Insert, &c.refresh);

        let err = coordinator.execute(&plan(true)).await.unwrap_err();

        assert!(matches!(
            err,
            SagaError::StepFailed {
                step: SagaStep::Refresh,
                phase: Phase::Write,
                ..
            }
        ));
        assert_eq!(
            worker.log().calls()[6..],
            [
                delete(&c.intents, "R1"),
                delete(&c.access, "A1"),
                delete(&c.intents, "A1"),
                delete(&c.basic, "b1"),
                delete(&c.intents, "b1"),
            ]
        );
        let store = worker.inner();
        for collection in [&c.basic, &c.access, &c.refresh, &c.intents] {
            assert_eq!(store.count(collection).await, 0, "{collection} not empty");
        }
    }

    #[tokio::test]
    async fn test_failed_target_delete_keeps_its_intent() {
        let (coordinator, worker) = setup();
        let c = collections();
        worker.failures().fail(Operation::Insert, &c.refresh);
        worker.failures().fail(Operation::Delete, &c.basic);

        let run = coordinator.run(&plan(true)).await;

        assert_eq!(run.state(), SagaState::Failed);
        assert_eq!(run.compensation_failures(), 1);
        assert!(!run.compensated().contains(&Compensation::DeleteIntent(SagaStep::Basic)));

        // The basic record and its intent survive; the sweep finishes the job
        let store = worker.inner();
        assert!(store.contains(&c.basic, "b1").await);
        assert!(store.contains(&c.intents, "b1").await);
        assert_eq!(store.count(&c.access).await, 0);

        worker.failures().clear();
        let report = coordinator.sweeper().sweep().await.unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(store.count(&c.basic).await, 0);
        assert_eq!(store.count(&c.intents).await, 0);
    }

    #[tokio::test]
    async fn test_failed_intent_delete_is_not_escalated() {
        let (coordinator, worker) = setup();
        let c = collections();
        worker.failures().fail(Operation::Insert, &c.access);
        worker.failures().fail(Operation::Delete, &c.intents);

        let err = coordinator.execute(&plan(false)).await.unwrap_err();

        // The original step failure is reported, not the compensation failure
        assert!(matches!(err, SagaError::StepFailed { step: SagaStep::Access, .. }));
        assert_eq!(worker.inner().count(&c.basic).await, 0);
        assert_eq!(worker.inner().count(&c.intents).await, 2);
    }

    #[tokio::test]
    async fn test_retry_with_same_ids_converges() {
        let (coordinator, worker) = setup();
        let c = collections();

        // A previous attempt crashed after writing some records
        let store = worker.inner();
        coordinator
            .intents()
            .record(store, RunId::new(), "b1", &c.basic)
            .await
            .unwrap();
        store
            .insert(&c.basic, plan(true).basic.to_document().unwrap())
            .await
            .unwrap();

        coordinator.execute(&plan(true)).await.unwrap();

        assert!(store.contains(&c.basic, "b1").await);
        assert!(store.contains(&c.access, "A1").await);
        assert!(store.contains(&c.refresh, "R1").await);
        assert_eq!(store.count(&c.intents).await, 0);
    }

    #[tokio::test]
    async fn test_index_owned_by_another_grant_fails_the_step() {
        let (coordinator, worker) = setup();
        let c = collections();
        let store = worker.inner();
        let expires = Utc::now() + Duration::hours(1);
        store
            .insert(&c.access, IndexRecord::new("A1", "b0", expires).to_document().unwrap())
            .await
            .unwrap();

        let err = coordinator.execute(&plan(true)).await.unwrap_err();

        assert!(matches!(
            err,
            SagaError::StepFailed { step: SagaStep::Access, phase: Phase::Write, ref source, .. }
                if source.is_duplicate_key()
        ));
        assert_eq!(
            worker.log().calls(),
            vec![
                insert(&c.intents, "b1"),
                insert(&c.basic, "b1"),
                insert(&c.intents, "A1"),
                insert(&c.access, "A1"),
                find(&c.access, "A1"),
                delete(&c.intents, "A1"),
                delete(&c.basic, "b1"),
                delete(&c.intents, "b1"),
            ]
        );

        // The other grant's index is untouched
        let stored: Option<IndexRecord> = store.find_by_id(&c.access, "A1").await.unwrap();
        assert_eq!(stored.unwrap().basic_id, "b0");
        assert_eq!(store.count(&c.basic).await, 0);
        assert_eq!(store.count(&c.intents).await, 0);
    }

    #[tokio::test]
    async fn test_compensation_leaves_adopted_records_to_the_sweep() {
        let (coordinator, worker) = setup();
        let c = collections();
        let store = worker.inner();
        store
            .insert(&c.access, plan(true).access.to_document().unwrap())
            .await
            .unwrap();
        worker.failures().fail(Operation::Insert, &c.refresh);

        let run = coordinator.run(&plan(true)).await;

        assert_eq!(run.state(), SagaState::Failed);
        assert_eq!(run.adopted(), &[Action::write(SagaStep::Access)]);
        assert!(!run.compensated().contains(&Compensation::DeleteTarget(SagaStep::Access)));
        assert!(store.contains(&c.access, "A1").await);
        assert!(store.contains(&c.intents, "A1").await);
        assert_eq!(store.count(&c.basic).await, 0);

        let report = coordinator.sweeper().sweep().await.unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(store.count(&c.access).await, 0);
        assert_eq!(store.count(&c.intents).await, 0);
    }

    #[tokio::test]
    async fn test_intent_from_earlier_run_survives_compensation() {
        let (coordinator, worker) = setup();
        let c = collections();
        let store = worker.inner();
        let expires = Utc::now() + Duration::hours(1);
        let earlier = RunId::new();
        coordinator
            .intents()
            .record(store, earlier, "A1", &c.access)
            .await
            .unwrap();
        store
            .insert(&c.access, IndexRecord::new("A1", "b0", expires).to_document().unwrap())
            .await
            .unwrap();

        let run = coordinator.run(&plan(false)).await;

        assert_eq!(run.state(), SagaState::Failed);
        assert_eq!(run.adopted(), &[Action::intent(SagaStep::Access)]);
        let pending = coordinator.intents().pending(store).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].txn_id, earlier.to_string());
    }

    #[tokio::test]
    async fn test_intents_carry_service_and_run() {
        let (coordinator, worker) = setup();
        let c = collections();
        worker.failures().fail(Operation::Delete, &c.intents);

        let run_id = coordinator.execute(&plan(false)).await.unwrap();

        let pending = coordinator.intents().pending(worker.inner()).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|i| i.service == SERVICE));
        assert!(pending.iter().all(|i| i.txn_id == run_id.to_string()));
    }
}
