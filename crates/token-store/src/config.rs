//! Store configuration loaded from environment variables.

use std::time::Duration;

use document_store::{Collections, MongoConnectOptions};

use crate::error::{Result, TokenStoreError};

const DEFAULT_URL: &str = "mongodb://127.0.0.1:27017";
const DEFAULT_DATABASE: &str = "oauth2";
const DEFAULT_SERVICE: &str = "oauth2";
const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Token store configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `MONGO_URL`: connection string (default: `"mongodb://127.0.0.1:27017"`)
/// - `MONGO_DB`: database name (default: `"oauth2"`)
/// - `MONGO_USERNAME`, `MONGO_PASSWORD`: credentials, standalone mode only
/// - `OAUTH2_SERVICE`: service identity owning the intent log (default: `"oauth2"`)
/// - `MONGO_REPLICA_SET`: `true` to use native transactions (default: `false`)
/// - `MONGO_CONNECT_TIMEOUT_SECS`: connect and server selection timeout
/// - `MONGO_REQUEST_TIMEOUT_SECS`: deadline for each storage call
/// - `MONGO_TXN_TIMEOUT_SECS`: transaction deadline (default: `2`)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub service: String,
    pub replica_set: bool,
    pub connect_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub transaction_timeout: Duration,
    pub collections: Collections,
}

impl StoreConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        Self {
            url: lookup("MONGO_URL").unwrap_or(defaults.url),
            database: lookup("MONGO_DB").unwrap_or(defaults.database),
            username: lookup("MONGO_USERNAME").filter(|v| !v.is_empty()),
            password: lookup("MONGO_PASSWORD").filter(|v| !v.is_empty()),
            service: lookup("OAUTH2_SERVICE").unwrap_or(defaults.service),
            replica_set: lookup("MONGO_REPLICA_SET")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.replica_set),
            connect_timeout: secs("MONGO_CONNECT_TIMEOUT_SECS"),
            request_timeout: secs("MONGO_REQUEST_TIMEOUT_SECS"),
            transaction_timeout: secs("MONGO_TXN_TIMEOUT_SECS")
                .unwrap_or(defaults.transaction_timeout),
            collections: defaults.collections,
        }
    }

    /// Sets the service identity.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Declares the deployment a replica set.
    pub fn with_replica_set(mut self, replica_set: bool) -> Self {
        self.replica_set = replica_set;
        self
    }

    /// Overrides the collection names.
    pub fn with_collections(mut self, collections: Collections) -> Self {
        self.collections = collections;
        self
    }

    /// Rejects configurations the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.service.is_empty() {
            return Err(TokenStoreError::Config("service must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(TokenStoreError::Config("database must not be empty".into()));
        }
        if self.transaction_timeout.is_zero() {
            return Err(TokenStoreError::Config(
                "transaction timeout must be positive".into(),
            ));
        }

        let c = &self.collections;
        let names = [&c.basic, &c.access, &c.refresh, &c.intents, &c.clients];
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(TokenStoreError::Config(
                    "collection names must not be empty".into(),
                ));
            }
            if names[..i].contains(name) {
                return Err(TokenStoreError::Config(format!(
                    "collection {name} is configured twice"
                )));
            }
        }
        Ok(())
    }

    /// Returns the driver connection settings.
    pub fn mongo_options(&self) -> MongoConnectOptions {
        MongoConnectOptions {
            url: self.url.clone(),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            replica_set: self.replica_set,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            username: None,
            password: None,
            service: DEFAULT_SERVICE.to_string(),
            replica_set: false,
            connect_timeout: None,
            request_timeout: None,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            collections: Collections::default(),
        }
    }
}
