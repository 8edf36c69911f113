//! Registered client credentials.

use common::ClientInfo;
use document_store::{Collections, Record, StorageWorker, StorageWorkerExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenStoreError};

/// Stored shape of a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub secret: String,
    pub domain: String,
    #[serde(rename = "userid")]
    pub user_id: String,
}

impl Record for ClientRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

impl From<&ClientInfo> for ClientRecord {
    fn from(info: &ClientInfo) -> Self {
        Self {
            id: info.id.clone(),
            secret: info.secret.clone(),
            domain: info.domain.clone(),
            user_id: info.user_id.clone(),
        }
    }
}

impl From<ClientRecord> for ClientInfo {
    fn from(record: ClientRecord) -> Self {
        ClientInfo::new(record.id, record.secret, record.domain, record.user_id)
    }
}

/// Single-document store of registered clients.
pub struct ClientStore<W: StorageWorker> {
    worker: W,
    collection: String,
}

impl<W: StorageWorker> ClientStore<W> {
    pub fn new(worker: W, collections: &Collections) -> Self {
        Self {
            worker,
            collection: collections.clients.clone(),
        }
    }

    /// Registers a client. An already registered id is left untouched.
    #[tracing::instrument(skip(self, info), fields(client_id = %info.id))]
    pub async fn create(&self, info: &ClientInfo) -> Result<()> {
        match self
            .worker
            .insert_record(&self.collection, &ClientRecord::from(info))
            .await
        {
            Err(e) if e.is_duplicate_key() => {
                tracing::debug!("client already registered");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<ClientInfo> {
        let record: Option<ClientRecord> = self.worker.find_by_id(&self.collection, id).await?;
        record
            .map(ClientInfo::from)
            .ok_or_else(|| TokenStoreError::not_found("client", id))
    }

    /// Deletes a client. Removing an unknown id is not an error.
    pub async fn remove_by_id(&self, id: &str) -> Result<()> {
        self.worker.delete(&self.collection, id).await?;
        Ok(())
    }
}
