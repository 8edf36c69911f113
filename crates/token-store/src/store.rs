//! The token store: payload building, path selection, and lookups.

use common::{TokenInfo, new_record_id};
use document_store::{BasicRecord, DocumentBackend, IndexRecord, PendingWrite, StorageWorkerExt};
use saga::{SagaCoordinator, SagaPlan, SweepReport};

use crate::config::StoreConfig;
use crate::error::{Result, TokenStoreError};

/// Persists OAuth2 token grants.
///
/// Creation uses a single native transaction when the deployment supports
/// one, and the intent-logged saga otherwise. In saga mode the store sweeps
/// abandoned intents before it is handed out.
pub struct TokenStore<B: DocumentBackend> {
    backend: B,
    saga: SagaCoordinator<B>,
    config: StoreConfig,
    transactions: bool,
    last_sweep: Option<SweepReport>,
}

impl<B: DocumentBackend + Clone> TokenStore<B> {
    /// Opens the store.
    ///
    /// Ensures the expiry indexes exist and, without native transactions,
    /// runs the recovery sweep to completion. A failure to reach storage is
    /// returned as an error.
    #[tracing::instrument(skip(backend, config), fields(service = %config.service))]
    pub async fn open(backend: B, config: StoreConfig) -> Result<Self> {
        config.validate()?;

        for collection in config.collections.expiring() {
            backend.ensure_expiry_index(collection).await?;
        }

        let transactions = config.replica_set && backend.supports_transactions();
        if config.replica_set && !transactions {
            tracing::warn!("replica set configured but transactions unavailable, using saga path");
        }

        let saga = SagaCoordinator::new(
            backend.clone(),
            config.collections.clone(),
            config.service.clone(),
        );

        let last_sweep = if transactions {
            None
        } else {
            Some(saga.sweeper().sweep().await?)
        };

        tracing::info!(transactions, "token store ready");

        Ok(Self {
            backend,
            saga,
            config,
            transactions,
            last_sweep,
        })
    }
}

impl<B: DocumentBackend> TokenStore<B> {
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns true if grants are written in a native transaction.
    pub fn uses_transactions(&self) -> bool {
        self.transactions
    }

    /// Report of the sweep run by [`TokenStore::open`], if one ran.
    pub fn last_sweep(&self) -> Option<&SweepReport> {
        self.last_sweep.as_ref()
    }

    /// Stores a grant.
    ///
    /// An authorization code grant is a single record keyed by the code.
    /// Otherwise the grant needs an access token and is written as a basic
    /// record plus one index per token, all or nothing.
    #[tracing::instrument(skip(self, info), fields(client_id = %info.client_id))]
    pub async fn create(&self, info: &TokenInfo) -> Result<()> {
        let data = serde_json::to_string(info)?;
        let basic_collection = &self.config.collections.basic;

        if let (Some(code), Some(credential)) = (info.code_value(), info.code.as_ref()) {
            let record = BasicRecord::new(code, data, credential.expires_at());
            self.backend.insert_record(basic_collection, &record).await?;
            metrics::counter!("token_store_grants_created_total", "path" => "code").increment(1);
            return Ok(());
        }

        let (Some(access_token), Some(access)) = (info.access_value(), info.access.as_ref())
        else {
            return Err(TokenStoreError::InvalidToken(
                "grant carries neither an authorization code nor an access token".into(),
            ));
        };

        let access_expiry = access.expires_at();
        let refresh = info.refresh_value().zip(info.refresh.as_ref());
        let refresh_expiry = refresh.map(|(_, credential)| credential.expires_at());
        let earliest = refresh_expiry.map_or(access_expiry, |r| r.min(access_expiry));

        let basic_id = new_record_id();
        let mut plan = SagaPlan::new(
            BasicRecord::new(&basic_id, data, earliest),
            IndexRecord::new(access_token, &basic_id, earliest),
        );
        if let (Some((refresh_token, _)), Some(expiry)) = (refresh, refresh_expiry) {
            plan = plan.with_refresh(IndexRecord::new(refresh_token, &basic_id, expiry));
        }

        if self.transactions {
            self.create_atomically(plan).await?;
            metrics::counter!("token_store_grants_created_total", "path" => "transaction")
                .increment(1);
        } else {
            self.saga.execute(&plan).await?;
            metrics::counter!("token_store_grants_created_total", "path" => "saga").increment(1);
        }
        Ok(())
    }

    async fn create_atomically(&self, plan: SagaPlan) -> Result<()> {
        let c = &self.config.collections;
        let mut writes = vec![
            PendingWrite::new(&c.basic, &plan.basic)?,
            PendingWrite::new(&c.access, &plan.access)?,
        ];
        if let Some(ref refresh) = plan.refresh {
            writes.push(PendingWrite::new(&c.refresh, refresh)?);
        }

        self.backend
            .insert_atomically(writes, self.config.transaction_timeout)
            .await?;
        Ok(())
    }

    /// Loads the grant stored under an authorization code.
    pub async fn get_by_code(&self, code: &str) -> Result<TokenInfo> {
        self.load_basic(code)
            .await?
            .ok_or_else(|| TokenStoreError::not_found("code", code))
    }

    /// Loads the grant owning an access token.
    pub async fn get_by_access(&self, access: &str) -> Result<TokenInfo> {
        self.resolve(&self.config.collections.access, access)
            .await?
            .ok_or_else(|| TokenStoreError::not_found("access token", access))
    }

    /// Loads the grant owning a refresh token.
    pub async fn get_by_refresh(&self, refresh: &str) -> Result<TokenInfo> {
        self.resolve(&self.config.collections.refresh, refresh)
            .await?
            .ok_or_else(|| TokenStoreError::not_found("refresh token", refresh))
    }

    async fn load_basic(&self, id: &str) -> Result<Option<TokenInfo>> {
        let record: Option<BasicRecord> = self
            .backend
            .find_by_id(&self.config.collections.basic, id)
            .await?;

        match record {
            Some(record) => Ok(Some(serde_json::from_str(&record.data)?)),
            None => Ok(None),
        }
    }

    /// Follows an index record to its basic record.
    async fn resolve(&self, index_collection: &str, token: &str) -> Result<Option<TokenInfo>> {
        let index: Option<IndexRecord> = self.backend.find_by_id(index_collection, token).await?;
        match index {
            Some(index) => self.load_basic(&index.basic_id).await,
            None => Ok(None),
        }
    }

    /// Deletes the grant stored under an authorization code.
    pub async fn remove_by_code(&self, code: &str) -> Result<()> {
        self.remove(&self.config.collections.basic, code).await
    }

    /// Deletes an access token index.
    pub async fn remove_by_access(&self, access: &str) -> Result<()> {
        self.remove(&self.config.collections.access, access).await
    }

    /// Deletes a refresh token index.
    pub async fn remove_by_refresh(&self, refresh: &str) -> Result<()> {
        self.remove(&self.config.collections.refresh, refresh).await
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<()> {
        let removed = self.backend.delete(collection, id).await?;
        tracing::debug!(collection, removed, "token removed");
        Ok(())
    }
}
