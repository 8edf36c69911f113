use std::future::IntoFuture;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Document, doc};
use futures_util::TryStreamExt;
use mongodb::error::{Error as DriverError, ErrorKind, WriteFailure};
use mongodb::options::{
    Acknowledgment, ClientOptions, Credential, IndexOptions, TransactionOptions, WriteConcern,
};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use tracing::{debug, instrument, warn};

use crate::record::{EXPIRY_FIELD, ID_FIELD, document_id};
use crate::store::{DocumentBackend, PendingWrite, StorageWorker};
use crate::{Filter, Result, StoreError};

/// Server error code for a unique index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Seconds after `ExpiredAt` at which the server removes a document.
const EXPIRE_AFTER: Duration = Duration::from_secs(1);

/// Connection settings for [`MongoStore::connect`].
#[derive(Debug, Clone)]
pub struct MongoConnectOptions {
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Option<Duration>,
    /// Deadline applied to every single storage call.
    pub request_timeout: Option<Duration>,
    /// Whether the deployment is a replica set able to run transactions.
    pub replica_set: bool,
}

impl Default for MongoConnectOptions {
    fn default() -> Self {
        Self {
            url: "mongodb://127.0.0.1:27017".to_string(),
            database: "oauth2".to_string(),
            username: None,
            password: None,
            connect_timeout: None,
            request_timeout: None,
            replica_set: false,
        }
    }
}

/// MongoDB-backed document store.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
    request_timeout: Option<Duration>,
    transactions: bool,
}

impl MongoStore {
    /// Wraps an already configured client.
    pub fn new(client: Client, database: &str) -> Self {
        let database = client.database(database);
        Self {
            client,
            database,
            request_timeout: None,
            transactions: false,
        }
    }

    /// Connects to the deployment described by `options`.
    ///
    /// Credentials are only applied for standalone deployments; replica set
    /// URLs are expected to carry their own authentication.
    #[instrument(
        skip(options),
        fields(database = %options.database, replica_set = options.replica_set)
    )]
    pub async fn connect(options: &MongoConnectOptions) -> Result<Self> {
        let mut client_options = ClientOptions::parse(&options.url)
            .await
            .map_err(StoreError::Database)?;

        if let Some(timeout) = options.connect_timeout {
            client_options.connect_timeout = Some(timeout);
            client_options.server_selection_timeout = Some(timeout);
        }

        if !options.replica_set
            && let Some(ref username) = options.username
        {
            let mut credential = Credential::default();
            credential.username = Some(username.clone());
            credential.password = options.password.clone();
            credential.source = Some(options.database.clone());
            client_options.credential = Some(credential);
        }

        let client = Client::with_options(client_options).map_err(StoreError::Database)?;
        debug!("MongoDB client created");

        Ok(Self::new(client, &options.database)
            .with_request_timeout(options.request_timeout)
            .with_transactions(options.replica_set))
    }

    /// Sets the per-call deadline. `None` leaves calls unbounded.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Declares whether multi-document transactions are available.
    pub fn with_transactions(mut self, enabled: bool) -> Self {
        self.transactions = enabled;
        self
    }

    /// Gets a reference to the underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Gets a reference to the selected database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }

    /// Runs a driver call under the per-call deadline.
    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<std::result::Result<T, DriverError>>
    where
        F: IntoFuture<Output = std::result::Result<T, DriverError>>,
    {
        let Some(limit) = self.request_timeout else {
            return Ok(call.await);
        };
        tokio::time::timeout(limit, call.into_future())
            .await
            .map_err(|_| StoreError::Timeout {
                operation,
                after: limit,
            })
    }

    /// Starts a transaction on `session` and issues every insert inside it.
    async fn stage_writes(
        &self,
        session: &mut ClientSession,
        writes: Vec<PendingWrite>,
        timeout: Duration,
    ) -> Result<()> {
        let write_concern = WriteConcern::builder()
            .w(Acknowledgment::Majority)
            .w_timeout(timeout)
            .build();
        let transaction = TransactionOptions::builder()
            .write_concern(write_concern)
            .max_commit_time(timeout)
            .build();

        session
            .start_transaction()
            .with_options(transaction)
            .await
            .map_err(StoreError::Database)?;

        for write in writes {
            let id = document_id(&write.collection, &write.document)?.to_string();
            self.collection(&write.collection)
                .insert_one(write.document)
                .session(&mut *session)
                .await
                .map_err(|e| classify(e, &write.collection, &id))?;
        }
        Ok(())
    }
}

/// Maps a driver error onto the store's error kinds.
fn classify(err: DriverError, collection: &str, id: &str) -> StoreError {
    let duplicate = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY_CODE,
        _ => false,
    };
    if duplicate {
        return StoreError::DuplicateKey {
            collection: collection.to_string(),
            id: id.to_string(),
        };
    }

    match err.kind.as_ref() {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. } => StoreError::Connectivity(err.to_string()),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl StorageWorker for MongoStore {
    #[instrument(skip(self, document))]
    async fn insert(&self, collection: &str, document: Document) -> Result<()> {
        let id = document_id(collection, &document)?.to_string();
        self.bounded("insert", self.collection(collection).insert_one(document))
            .await?
            .map_err(|e| classify(e, collection, &id))?;
        Ok(())
    }

    #[instrument(skip(self, id))]
    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let mut filter = Document::new();
        filter.insert(ID_FIELD, id);

        let result = self
            .bounded("delete", self.collection(collection).delete_one(filter))
            .await?
            .map_err(|e| classify(e, collection, id))?;
        Ok(result.deleted_count > 0)
    }

    #[instrument(skip(self, filter))]
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let id = filter.id.as_deref().unwrap_or_default();
        let target = self.collection(collection);
        let query = async {
            target
                .find(filter.to_document())
                .await?
                .try_collect::<Vec<Document>>()
                .await
        };

        let documents = self
            .bounded("find", query)
            .await?
            .map_err(|e| classify(e, collection, id))?;

        Ok(documents)
    }
}

#[async_trait]
impl DocumentBackend for MongoStore {
    fn supports_transactions(&self) -> bool {
        self.transactions
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    async fn insert_atomically(&self, writes: Vec<PendingWrite>, timeout: Duration) -> Result<()> {
        if !self.transactions {
            return Err(StoreError::TransactionsUnsupported);
        }

        let mut session = self
            .bounded("start_session", self.client.start_session())
            .await?
            .map_err(StoreError::Database)?;

        // The client deadline covers staging only. The commit is never dropped
        // mid-flight; `max_commit_time` bounds it on the server.
        let staged = tokio::time::timeout(timeout, self.stage_writes(&mut session, writes, timeout))
            .await
            .unwrap_or(Err(StoreError::Timeout {
                operation: "transaction",
                after: timeout,
            }));

        if let Err(staging) = staged {
            if let Err(e) = session.abort_transaction().await {
                debug!(error = %e, "Transaction abort failed");
            }
            return Err(staging);
        }

        // A commit that fails with an unknown result may still have been
        // applied; the driver retries it once before reporting the error.
        session
            .commit_transaction()
            .await
            .map_err(|e| match e.kind.as_ref() {
                ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
                    StoreError::Connectivity(e.to_string())
                }
                _ => StoreError::Database(e),
            })
    }

    #[instrument(skip(self))]
    async fn ensure_expiry_index(&self, collection: &str) -> Result<()> {
        let mut keys = Document::new();
        keys.insert(EXPIRY_FIELD, 1);

        let index = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().expire_after(EXPIRE_AFTER).build())
            .build();

        self.bounded("create_index", self.collection(collection).create_index(index))
            .await?
            .map_err(|e| {
                warn!(collection, error = %e, "Failed to create expiry index");
                StoreError::Database(e)
            })?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.bounded(
            "ping",
            self.client.database("admin").run_command(doc! { "ping": 1 }),
        )
        .await?
        .map_err(|e| classify(e, "admin", ""))?;
        Ok(())
    }
}
