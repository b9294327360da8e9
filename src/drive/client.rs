//! Drive v3 REST client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{
    DriveApi, DriveError, Download, Permission, RemoteFile, ServiceAccountKey,
    ServiceAccountTokens, TokenSource,
};
use crate::config::DriveSettings;

const FILE_FIELDS: &str = "id,name,mimeType,webViewLink,webContentLink";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Drive API client authenticated through a [`TokenSource`].
pub struct GoogleDrive {
    http: reqwest::Client,
    base: String,
    tokens: Arc<dyn TokenSource>,
}

impl GoogleDrive {
    pub fn new(http: reqwest::Client, base: &str, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// HTTP client with the configured per-call timeout.
    pub fn http_client(settings: &DriveSettings) -> Result<reqwest::Client, DriveError> {
        Ok(reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("oink-backend/", env!("CARGO_PKG_VERSION")))
            .build()?)
    }

    /// Client authenticated as the configured service account, or `None` when no
    /// service account is configured.
    pub fn from_settings(settings: &DriveSettings) -> Result<Option<Self>, DriveError> {
        let Some(source) = settings.service_account.as_deref() else {
            return Ok(None);
        };
        let key = ServiceAccountKey::load(source)?;
        let http = Self::http_client(settings)?;
        let tokens = ServiceAccountTokens::new(key, settings.impersonate_user.clone(), http.clone());
        Ok(Some(Self::new(http, &settings.api_base, Arc::new(tokens))))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/drive/v3/{}", self.base, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DriveError> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DriveError::Status { status, body })
    }
}

#[async_trait]
impl DriveApi for GoogleDrive {
    async fn find_files(&self, query: &str) -> Result<Vec<RemoteFile>, DriveError> {
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.to_string()),
                ("fields", fields.clone()),
                ("pageSize", "1000".to_string()),
                ("supportsAllDrives", "true".to_string()),
                ("includeItemsFromAllDrives", "true".to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let response = self
                .send(self.http.get(self.url("files")).query(&params))
                .await?;
            let page: FileList = response.json().await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(query, count = files.len(), "Listed Drive files");
        Ok(files)
    }

    async fn export_text(&self, file_id: &str) -> Result<String, DriveError> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("files/{}/export", file_id)))
                    .query(&[("mimeType", "text/plain")]),
            )
            .await?;
        let bytes = response.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn download(&self, file_id: &str) -> Result<Download, DriveError> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("files/{}", file_id)))
                    .query(&[("alt", "media"), ("supportsAllDrives", "true")]),
            )
            .await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok(Download {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        parent_id: Option<&str>,
    ) -> Result<RemoteFile, DriveError> {
        let mut body = json!({ "name": name, "mimeType": mime_type });
        if let Some(parent) = parent_id {
            body["parents"] = json!([parent]);
        }
        let response = self
            .send(
                self.http
                    .post(self.url("files"))
                    .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
                    .json(&body),
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn create_permission(&self, file_id: &str, permission: &Permission) -> Result<(), DriveError> {
        self.send(
            self.http
                .post(self.url(&format!("files/{}/permissions", file_id)))
                .query(&[("fields", "id"), ("supportsAllDrives", "true")])
                .json(permission),
        )
        .await?;
        Ok(())
    }
}
