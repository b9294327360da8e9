//! Users and their stored Google OAuth credentials.

use serde::{Deserialize, Serialize};

/// A person who signed in through Google.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    pub created_at: String,
}

/// OAuth tokens held for one user. Stored as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub scope: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl Credential {
    pub fn empty(user_id: impl Into<String>, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: String::new(),
            refresh_token: String::new(),
            token_type: String::new(),
            scope: String::new(),
            expires_at: None,
            updated_at: now,
        }
    }

    /// Fold a token response into this credential. A grant without a refresh token
    /// keeps the one already stored.
    pub fn apply_grant(&mut self, grant: &TokenGrant, now: chrono::DateTime<chrono::Utc>) {
        self.access_token = grant.access_token.clone();
        if let Some(refresh) = grant.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            self.refresh_token = refresh.to_string();
        }
        if let Some(token_type) = &grant.token_type {
            self.token_type = token_type.clone();
        }
        if let Some(scope) = &grant.scope {
            self.scope = scope.clone();
        }
        if let Some(secs) = grant.expires_in {
            self.expires_at = Some(now + chrono::Duration::seconds(secs));
        }
        self.updated_at = now;
    }

    /// True when the access token is missing or expires within `margin`.
    pub fn needs_refresh(&self, now: chrono::DateTime<chrono::Utc>, margin: chrono::Duration) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => expires_at - margin <= now,
            None => false,
        }
    }
}
