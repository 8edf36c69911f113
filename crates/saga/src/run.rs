//! The record of one saga invocation.

use chrono::{DateTime, Utc};
use common::RunId;

use crate::error::SagaError;
use crate::state::{SagaState, Transition};
use crate::step::{Action, Compensation};

/// Tracks what a single saga invocation did.
///
/// Completed actions are kept in execution order so compensation can replay
/// them in reverse.
#[derive(Debug)]
pub struct SagaRun {
    id: RunId,
    state: SagaState,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    completed: Vec<Action>,
    adopted: Vec<Action>,
    compensated: Vec<Compensation>,
    compensation_failures: usize,
    failure: Option<SagaError>,
}

impl SagaRun {
    pub fn new() -> Self {
        Self::with_id(RunId::new())
    }

    pub fn with_id(id: RunId) -> Self {
        Self {
            id,
            state: SagaState::NotStarted,
            started_at: Utc::now(),
            finished_at: None,
            completed: Vec::new(),
            adopted: Vec::new(),
            compensated: Vec::new(),
            compensation_failures: 0,
            failure: None,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Forward actions that succeeded, in execution order.
    pub fn completed(&self) -> &[Action] {
        &self.completed
    }

    /// Completed actions satisfied by a record that was already stored.
    ///
    /// This run did not write those records, so compensation leaves them
    /// alone.
    pub fn adopted(&self) -> &[Action] {
        &self.adopted
    }

    /// Compensations that succeeded, in the order they ran.
    pub fn compensated(&self) -> &[Compensation] {
        &self.compensated
    }

    pub fn compensation_failures(&self) -> usize {
        self.compensation_failures
    }

    pub fn failure(&self) -> Option<&SagaError> {
        self.failure.as_ref()
    }

    fn transition(&mut self, transition: Transition) {
        match self.state.apply(transition) {
            Some(next) => self.state = next,
            None => tracing::warn!(
                run_id = %self.id,
                state = %self.state,
                ?transition,
                "ignored saga transition"
            ),
        }
    }

    pub(crate) fn start(&mut self) {
        self.transition(Transition::Start);
    }

    pub(crate) fn record(&mut self, action: Action) {
        self.completed.push(action);
    }

    pub(crate) fn record_adopted(&mut self, action: Action) {
        self.completed.push(action);
        self.adopted.push(action);
    }

    pub(crate) fn begin_compensation(&mut self, error: SagaError) {
        self.transition(Transition::Fail);
        self.failure = Some(error);
    }

    pub(crate) fn record_compensation(&mut self, compensation: Compensation) {
        self.compensated.push(compensation);
    }

    pub(crate) fn record_compensation_failure(&mut self) {
        self.compensation_failures += 1;
    }

    pub(crate) fn finish(&mut self) {
        self.transition(Transition::Finish);
        self.finished_at = Some(Utc::now());
    }

    /// Converts the run into the caller-facing result.
    pub fn into_result(self) -> Result<RunId, SagaError> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.id),
        }
    }
}

impl Default for SagaRun {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::SagaStep;
    use document_store::StoreError;

    #[test]
    fn test_successful_lifecycle() {
        let mut run = SagaRun::new();
        assert_eq!(run.state(), SagaState::NotStarted);

        run.start();
        run.record(Action::intent(SagaStep::Basic));
        run.record(Action::write(SagaStep::Basic));
        run.finish();

        assert_eq!(run.state(), SagaState::Completed);
        assert_eq!(run.completed().len(), 2);
        assert!(run.adopted().is_empty());
        assert!(run.finished_at().is_some());
        let id = run.id();
        assert_eq!(run.into_result().unwrap(), id);
    }

    #[test]
    fn test_failed_lifecycle() {
        let mut run = SagaRun::new();
        run.start();
        run.begin_compensation(SagaError::Store(StoreError::TransactionsUnsupported));
        assert_eq!(run.state(), SagaState::Compensating);

        run.finish();
        assert_eq!(run.state(), SagaState::Failed);
        assert!(run.failure().is_some());
        assert!(run.into_result().is_err());
    }

    #[test]
    fn test_adopted_actions_count_as_completed() {
        let mut run = SagaRun::new();
        run.start();
        run.record(Action::intent(SagaStep::Access));
        run.record_adopted(Action::write(SagaStep::Access));

        assert_eq!(run.completed().len(), 2);
        assert_eq!(run.adopted(), &[Action::write(SagaStep::Access)]);
    }
}
