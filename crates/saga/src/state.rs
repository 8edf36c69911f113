//! Lifecycle of a token-creation saga run.

use serde::{Deserialize, Serialize};

/// Where a saga run is in its lifecycle.
///
/// ```text
/// NotStarted ─start─► Running ─finish─────────────────► Completed
///                        └──fail──► Compensating ─finish─► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    #[default]
    NotStarted,
    /// Intents and target records are being written.
    Running,
    /// A forward action failed; completed actions are undone newest first.
    Compensating,
    /// Every target landed and the intents are gone.
    Completed,
    /// Compensation ran to the end. Leftovers, if any, belong to the sweeper.
    Failed,
}

/// Events that move a run between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Fail,
    Finish,
}

impl SagaState {
    /// Applies a transition, returning `None` when it is not allowed from here.
    pub fn apply(self, transition: Transition) -> Option<SagaState> {
        use SagaState::*;
        use Transition::*;

        match (self, transition) {
            (NotStarted, Start) => Some(Running),
            (Running, Fail) => Some(Compensating),
            (Running, Finish) => Some(Completed),
            (Compensating, Finish) => Some(Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    /// Label used for log fields and metric dimensions.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "not_started",
            SagaState::Running => "running",
            SagaState::Compensating => "compensating",
            SagaState::Completed => "completed",
            SagaState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
