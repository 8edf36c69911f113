//! Document storage for the OAuth2 token store.
//!
//! Provides the record shapes persisted by the store, the narrow
//! [`StorageWorker`] capability set used by the saga, and the backends that
//! implement it: an in-memory store, a MongoDB store, and a recording double
//! for tests.

pub mod collections;
pub mod error;
pub mod memory;
pub mod mongo;
pub mod query;
pub mod record;
pub mod recording;
pub mod store;

pub use collections::Collections;
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use mongo::{MongoConnectOptions, MongoStore};
pub use query::Filter;
pub use record::{BasicRecord, IndexRecord, IntentRecord, Record};
pub use recording::{Call, CallLog, FailurePlan, RecordingWorker};
pub use store::{DocumentBackend, Operation, PendingWrite, StorageWorker, StorageWorkerExt};

pub use bson::Document;
