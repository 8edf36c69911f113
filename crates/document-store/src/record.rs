//! Record shapes persisted by the token store.
//!
//! Field names (`_id`, `Data`, `ExpiredAt`, `BasicID`, ...) follow the
//! established on-disk naming. `Data` holds the payload as JSON text.

use bson::Document;
use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use common::RunId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// Primary key field of every document.
pub const ID_FIELD: &str = "_id";

/// Field holding the owning service of an intent.
pub const SERVICE_FIELD: &str = "Service";

/// Field indexed for automatic time-based removal.
pub const EXPIRY_FIELD: &str = "ExpiredAt";

/// A typed document keyed by a string `_id`.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Returns the document's primary key.
    fn id(&self) -> &str;

    /// Encodes the record as a BSON document.
    fn to_document(&self) -> Result<Document> {
        Ok(bson::to_document(self)?)
    }

    /// Decodes a record from a stored BSON document.
    fn from_document(document: Document) -> Result<Self>
    where
        Self: Sized,
    {
        Ok(bson::from_document(document)?)
    }
}

/// Returns the string `_id` of a raw document.
pub fn document_id<'a>(collection: &str, document: &'a Document) -> Result<&'a str> {
    document
        .get_str(ID_FIELD)
        .map_err(|_| StoreError::MissingId {
            collection: collection.to_string(),
        })
}

/// The serialized token payload of one grant.
///
/// Keyed by the authorization code for code grants, or by a generated id when
/// access/refresh tokens are involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicRecord {
    #[serde(rename = "_id")]
    pub id: String,

    /// JSON text of the token payload.
    #[serde(rename = "Data")]
    pub data: String,

    #[serde(rename = "ExpiredAt", with = "chrono_datetime_as_bson_datetime")]
    pub expired_at: DateTime<Utc>,
}

impl BasicRecord {
    pub fn new(id: impl Into<String>, data: impl Into<String>, expired_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            expired_at,
        }
    }
}

impl Record for BasicRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Maps a public token string to the basic record that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// The public access or refresh token.
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "BasicID")]
    pub basic_id: String,

    #[serde(rename = "ExpiredAt", with = "chrono_datetime_as_bson_datetime")]
    pub expired_at: DateTime<Utc>,
}

impl IndexRecord {
    pub fn new(
        id: impl Into<String>,
        basic_id: impl Into<String>,
        expired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            basic_id: basic_id.into(),
            expired_at,
        }
    }
}

impl Record for IndexRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Write-ahead entry recorded immediately before a target write.
///
/// Shares its `_id` with the target record. A surviving intent after restart
/// marks the target write as incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRecord {
    #[serde(rename = "_id")]
    pub id: String,

    /// Saga run that wrote the intent.
    #[serde(rename = "TxnID")]
    pub txn_id: String,

    /// Collection the target record lives in.
    #[serde(rename = "Collection")]
    pub collection: String,

    #[serde(rename = "Service")]
    pub service: String,

    #[serde(rename = "CreatedAt", with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl IntentRecord {
    /// Creates an intent stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        run_id: RunId,
        collection: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            txn_id: run_id.to_string(),
            collection: collection.into(),
            service: service.into(),
            created_at: Utc::now(),
        }
    }
}

impl Record for IntentRecord {
    fn id(&self) -> &str {
        &self.id
    }
}
