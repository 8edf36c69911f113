use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a fresh identifier for a stored record.
///
/// Identifiers are 32 lowercase hex characters, which keeps them usable as
/// plain string document keys in any backend.
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Identifier of a single saga run.
///
/// Every intent written during one token-creation saga carries the same run
/// ID, which makes leftovers from a crashed run traceable in the intent log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a run ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
