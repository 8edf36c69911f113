//! Token grant model handed to the store on creation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single issued secret (authorization code, access token or refresh token)
/// together with its validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The public string handed to the client.
    pub value: String,

    /// When the secret was issued.
    pub created_at: DateTime<Utc>,

    /// How long the secret stays valid after `created_at`.
    pub expires_in: Duration,
}

impl Credential {
    /// Creates a credential issued now.
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        Self::issued_at(value, Utc::now(), expires_in)
    }

    /// Creates a credential issued at a specific instant.
    pub fn issued_at(
        value: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_in: Duration,
    ) -> Self {
        Self {
            value: value.into(),
            created_at,
            expires_in,
        }
    }

    /// Returns the instant after which the credential is no longer valid.
    ///
    /// Saturates at the maximum representable time for absurd durations.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.expires_in)
            .ok()
            .and_then(|delta| self.created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Token information for one grant.
///
/// A grant either carries an authorization code, or an access token with an
/// optional refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenInfo {
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Credential>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Credential>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<Credential>,
}

impl TokenInfo {
    /// Creates token information for a client acting on behalf of a user.
    pub fn new(client_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Attaches an authorization code.
    pub fn with_code(mut self, code: Credential) -> Self {
        self.code = Some(code);
        self
    }

    /// Attaches an access token.
    pub fn with_access(mut self, access: Credential) -> Self {
        self.access = Some(access);
        self
    }

    /// Attaches a refresh token.
    pub fn with_refresh(mut self, refresh: Credential) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Returns the authorization code value, ignoring empty strings.
    pub fn code_value(&self) -> Option<&str> {
        non_empty(self.code.as_ref())
    }

    /// Returns the access token value, ignoring empty strings.
    pub fn access_value(&self) -> Option<&str> {
        non_empty(self.access.as_ref())
    }

    /// Returns the refresh token value, ignoring empty strings.
    pub fn refresh_value(&self) -> Option<&str> {
        non_empty(self.refresh.as_ref())
    }
}

fn non_empty(credential: Option<&Credential>) -> Option<&str> {
    credential
        .map(|c| c.value.as_str())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_at_adds_validity_to_issue_time() {
        let issued = Utc::now();
        let credential = Credential::issued_at("A1", issued, Duration::from_secs(5));
        assert_eq!(
            credential.expires_at(),
            issued + chrono::Duration::seconds(5)
        );
    }

    #[test]
    fn expires_at_saturates_on_overflow() {
        let credential = Credential::new("A1", Duration::MAX);
        assert_eq!(credential.expires_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn empty_values_count_as_absent() {
        let info = TokenInfo::new("1", "1_1")
            .with_access(Credential::new("", Duration::from_secs(5)))
            .with_refresh(Credential::new("R1", Duration::from_secs(15)));

        assert_eq!(info.code_value(), None);
        assert_eq!(info.access_value(), None);
        assert_eq!(info.refresh_value(), Some("R1"));
    }

    #[test]
    fn json_omits_missing_credentials() {
        let info = TokenInfo::new("1", "1_1")
            .with_scope("all")
            .with_code(Credential::new("CODE1", Duration::from_secs(5)));

        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("code").is_some());
        assert!(json.get("access").is_none());
        assert!(json.get("refresh").is_none());

        let back: TokenInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }
}
