//! Google sign-in endpoints.

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::User;
use crate::oauth::OAuthClient;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

fn oauth_client(state: &AppState) -> Result<&OAuthClient, AppError> {
    state
        .oauth
        .as_deref()
        .ok_or_else(|| AppError::Unavailable("Google sign-in is not configured".to_string()))
}

/// GET /google/login - Redirect to the Google consent screen.
pub async fn google_login(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let url = oauth_client(&state)?.authorize_url()?;
    Ok(Redirect::temporary(&url))
}

/// GET /google/callback - Complete sign-in and store the user's tokens.
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<User> {
    if let Some(error) = query.error {
        return Err(AppError::BadRequest(format!("Google sign-in failed: {}", error)));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing authorization code".to_string()))?;

    let user = oauth_client(&state)?
        .complete_login(&state.repo, &code)
        .await?;
    success(user)
}
