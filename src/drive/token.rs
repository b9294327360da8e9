//! Access tokens for the Drive API.
//!
//! Two sources are supported: a service account signing its own JWT bearer grant
//! (optionally impersonating a user), and a user's stored OAuth credential.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{DriveError, DRIVE_SCOPE};
use crate::db::Repository;
use crate::models::TokenGrant;
use crate::oauth::OAuthClient;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are renewed this long before they expire.
fn refresh_margin() -> Duration {
    Duration::seconds(60)
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A bearer token valid for at least the next minute.
    async fn access_token(&self) -> Result<String, DriveError>;
}

/// A fixed token.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, DriveError> {
        Ok(self.0.clone())
    }
}

/// The fields of a service account key file that token signing needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Load a key from a file path or from inline JSON.
    pub fn load(source: &str) -> Result<Self, DriveError> {
        let source = source.trim();
        if source.starts_with('{') {
            return Self::parse(source);
        }
        let path = Path::new(source);
        let json = std::fs::read_to_string(path).map_err(|e| {
            DriveError::Credentials(format!(
                "cannot read service account file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&json)
    }

    pub fn parse(json: &str) -> Result<Self, DriveError> {
        serde_json::from_str(json)
            .map_err(|e| DriveError::Credentials(format!("invalid service account key: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Service account credentials exchanged for access tokens with a signed JWT.
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    subject: Option<String>,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey, subject: Option<String>, http: reqwest::Client) -> Self {
        Self {
            key,
            subject,
            http,
            cached: Mutex::new(None),
        }
    }

    /// Sign the bearer grant assertion.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String, DriveError> {
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| DriveError::Credentials(format!("invalid private key: {}", e)))?;
        let claims = Claims {
            iss: &self.key.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
            sub: self.subject.as_deref(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| DriveError::Credentials(format!("cannot sign token request: {}", e)))
    }

    async fn request_token(&self) -> Result<CachedToken, DriveError> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Credentials(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let grant: TokenGrant = response.json().await?;
        Ok(CachedToken {
            token: grant.access_token,
            expires_at: now + Duration::seconds(grant.expires_in.unwrap_or(3600)),
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, DriveError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - refresh_margin() > Utc::now() {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.request_token().await?;
        tracing::debug!(
            client_email = %self.key.client_email,
            expires_at = %fresh.expires_at,
            "Obtained service account token"
        );
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Drive access as a signed-in user, refreshing the stored credential when needed.
pub struct UserCredentialTokens {
    repo: Repository,
    oauth: Arc<OAuthClient>,
    user_id: String,
}

impl UserCredentialTokens {
    pub fn new(repo: Repository, oauth: Arc<OAuthClient>, user_id: String) -> Self {
        Self {
            repo,
            oauth,
            user_id,
        }
    }
}

#[async_trait]
impl TokenSource for UserCredentialTokens {
    async fn access_token(&self) -> Result<String, DriveError> {
        let credential = self
            .repo
            .get_credential(&self.user_id)
            .await
            .map_err(|e| DriveError::Credentials(e.message()))?
            .ok_or_else(|| DriveError::Credentials("no stored Google credential".to_string()))?;

        let now = Utc::now();
        if !credential.needs_refresh(now, refresh_margin()) {
            return Ok(credential.access_token);
        }

        let refreshed = self
            .oauth
            .refresh_credential(&self.repo, credential)
            .await
            .map_err(|e| DriveError::Credentials(e.to_string()))?;
        Ok(refreshed.access_token)
    }
}
