//! Names of the collections the token store persists into.

/// Collection names used by the store.
///
/// Defaults match the names used by existing deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    /// Serialized token payloads.
    pub basic: String,
    /// Access token → basic id index.
    pub access: String,
    /// Refresh token → basic id index.
    pub refresh: String,
    /// Write-ahead intent log.
    pub intents: String,
    /// Registered clients.
    pub clients: String,
}

impl Collections {
    /// Returns true if `name` is one of the two index collections.
    pub fn is_index(&self, name: &str) -> bool {
        name == self.access || name == self.refresh
    }

    /// Collections whose documents carry an expiry timestamp.
    pub fn expiring(&self) -> [&str; 3] {
        [&self.basic, &self.access, &self.refresh]
    }
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            basic: "oauth2_basic".to_string(),
            access: "oauth2_access".to_string(),
            refresh: "oauth2_refresh".to_string(),
            intents: "oauth2_txn".to_string(),
            clients: "oauth2_clients".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names() {
        let c = Collections::default();
        assert_eq!(c.basic, "oauth2_basic");
        assert_eq!(c.access, "oauth2_access");
        assert_eq!(c.refresh, "oauth2_refresh");
        assert_eq!(c.intents, "oauth2_txn");
        assert_eq!(c.clients, "oauth2_clients");
    }

    #[test]
    fn index_collections() {
        let c = Collections::default();
        assert!(c.is_index("oauth2_access"));
        assert!(c.is_index("oauth2_refresh"));
        assert!(!c.is_index("oauth2_basic"));
        assert!(!c.is_index("oauth2_txn"));
    }
}
