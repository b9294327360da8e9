//! Google OAuth: sign-in, code exchange and token refresh for stored credentials.

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::config::OAuthSettings;
use crate::db::Repository;
use crate::drive::DRIVE_SCOPE;
use crate::models::{Credential, TokenGrant, User};

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("OAuth provider returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("{0} is not an allowed account")]
    DomainNotAllowed(String),
    #[error("no refresh token stored for this user")]
    MissingRefreshToken,
    #[error("credential store error: {0}")]
    Store(String),
    #[error("invalid OAuth endpoint: {0}")]
    Url(#[from] url::ParseError),
}

/// Profile returned by the user-info endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub struct OAuthClient {
    http: reqwest::Client,
    settings: OAuthSettings,
}

impl OAuthClient {
    pub fn new(settings: OAuthSettings, http: reqwest::Client) -> Self {
        Self { http, settings }
    }

    /// Consent screen URL requesting offline access so a refresh token is issued.
    pub fn authorize_url(&self) -> Result<String, OAuthError> {
        let scope = format!("openid email profile {}", DRIVE_SCOPE);
        let url = url::Url::parse_with_params(
            &self.settings.auth_url,
            &[
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
            ],
        )?;
        Ok(url.into())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, OAuthError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_url.as_str()),
        ])
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant, OAuthError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&form)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn user_info(&self, access_token: &str) -> Result<UserInfo, OAuthError> {
        let response = self
            .http
            .get(&self.settings.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Only accounts in the configured email domain may sign in.
    pub fn check_domain(&self, email: &str) -> Result<(), OAuthError> {
        let suffix = format!("@{}", self.settings.email_domain.to_ascii_lowercase());
        if email.trim().to_ascii_lowercase().ends_with(&suffix) {
            Ok(())
        } else {
            Err(OAuthError::DomainNotAllowed(email.to_string()))
        }
    }

    /// Finish a sign-in: exchange the code, check the account and store its tokens.
    pub async fn complete_login(&self, repo: &Repository, code: &str) -> Result<User, OAuthError> {
        let grant = self.exchange_code(code).await?;
        let info = self.user_info(&grant.access_token).await?;
        self.check_domain(&info.email)?;

        let user = repo
            .upsert_user(&info.email, info.name.as_deref().unwrap_or_default())
            .await
            .map_err(|e| OAuthError::Store(e.message()))?;

        let now = Utc::now();
        let mut credential = repo
            .get_credential(&user.id)
            .await
            .map_err(|e| OAuthError::Store(e.message()))?
            .unwrap_or_else(|| Credential::empty(&user.id, now));
        credential.apply_grant(&grant, now);
        repo.save_credential(&credential)
            .await
            .map_err(|e| OAuthError::Store(e.message()))?;

        tracing::info!(email = %user.email, "Stored Google credential");
        Ok(user)
    }

    /// Refresh a stored credential and persist the new tokens.
    pub async fn refresh_credential(
        &self,
        repo: &Repository,
        mut credential: Credential,
    ) -> Result<Credential, OAuthError> {
        if credential.refresh_token.is_empty() {
            return Err(OAuthError::MissingRefreshToken);
        }
        let grant = self.refresh(&credential.refresh_token).await?;
        credential.apply_grant(&grant, Utc::now());
        repo.save_credential(&credential)
            .await
            .map_err(|e| OAuthError::Store(e.message()))?;

        tracing::debug!(user_id = %credential.user_id, "Refreshed Google credential");
        Ok(credential)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, OAuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OAuthError::Status { status, body })
}
