//! Saga steps, phases, and the compensation table.

use serde::{Deserialize, Serialize};

/// One of the three writes a token grant is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStep {
    /// The serialized token payload.
    Basic,
    /// The access token index.
    Access,
    /// The refresh token index.
    Refresh,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Basic => "basic",
            SagaStep::Access => "access",
            SagaStep::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every step writes its intent before its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Intent,
    Write,
}

impl Phase {
    /// Phases in execution order.
    pub const ORDER: [Phase; 2] = [Phase::Intent, Phase::Write];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Intent => "intent",
            Phase::Write => "write",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single forward action of a saga run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub step: SagaStep,
    pub phase: Phase,
}

impl Action {
    pub fn new(step: SagaStep, phase: Phase) -> Self {
        Self { step, phase }
    }

    pub fn intent(step: SagaStep) -> Self {
        Self::new(step, Phase::Intent)
    }

    pub fn write(step: SagaStep) -> Self {
        Self::new(step, Phase::Write)
    }

    /// Returns the action that undoes this one.
    pub fn compensation(&self) -> Compensation {
        match self.phase {
            Phase::Intent => Compensation::DeleteIntent(self.step),
            Phase::Write => Compensation::DeleteTarget(self.step),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.step, self.phase)
    }
}

/// Undo of a completed [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compensation {
    DeleteIntent(SagaStep),
    DeleteTarget(SagaStep),
}

impl Compensation {
    pub fn step(&self) -> SagaStep {
        match self {
            Compensation::DeleteIntent(step) | Compensation::DeleteTarget(step) => *step,
        }
    }
}
