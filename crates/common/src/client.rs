use serde::{Deserialize, Serialize};

/// Registered OAuth2 client credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub secret: String,
    pub domain: String,
    pub user_id: String,
}

impl ClientInfo {
    /// Creates client information.
    pub fn new(
        id: impl Into<String>,
        secret: impl Into<String>,
        domain: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            domain: domain.into(),
            user_id: user_id.into(),
        }
    }
}
