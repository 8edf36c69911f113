//! Saga pattern implementation for multi-collection token writes.
//!
//! A token grant touches up to three collections. Without native
//! transactions the writes are sequenced as a saga:
//! 1. Basic step: intent, then the serialized token payload
//! 2. Access step: intent, then the access token index
//! 3. Refresh step (optional): intent, then the refresh token index
//!
//! If any action fails, previously completed actions are compensated in
//! reverse order. Intents left behind by a crash are rolled back by the
//! [`RecoverySweeper`] at startup.

pub mod coordinator;
pub mod error;
pub mod intent;
pub mod recovery;
pub mod run;
pub mod state;
pub mod step;

pub use coordinator::{SagaCoordinator, SagaPlan, Target};
pub use error::SagaError;
pub use intent::IntentLog;
pub use recovery::{RecoverySweeper, SweepReport};
pub use run::SagaRun;
pub use state::{SagaState, Transition};
pub use step::{Action, Compensation, Phase, SagaStep};
