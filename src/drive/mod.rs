//! Google Drive access: the REST client, credentials, folder id normalization and
//! folder provisioning.

mod client;
#[cfg(test)]
pub mod fake;
mod normalize;
mod provision;
mod token;

pub use client::GoogleDrive;
pub use normalize::*;
pub use provision::*;
pub use token::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// MIME type of Drive folders.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
/// MIME type of native Google Docs.
pub const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";
/// OAuth scope granting full Drive access.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

#[derive(Debug, Error)]
pub enum DriveError {
    /// Credentials are missing or unusable.
    #[error("Drive credentials unavailable: {0}")]
    Credentials(String),
    #[error("Drive transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Drive API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Drive call timed out")]
    Timeout,
}

/// A file or folder as listed by the Drive API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,
}

/// Downloaded file content.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// A sharing rule for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Permission {
    pub fn anyone(role: &str) -> Self {
        Self {
            kind: "anyone".to_string(),
            role: role.to_string(),
            domain: None,
        }
    }

    pub fn domain(domain: &str, role: &str) -> Self {
        Self {
            kind: "domain".to_string(),
            role: role.to_string(),
            domain: Some(domain.to_string()),
        }
    }
}

/// The Drive operations the provisioner and the fetch pipeline rely on.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Run a Drive search query, following pagination.
    async fn find_files(&self, query: &str) -> Result<Vec<RemoteFile>, DriveError>;

    /// Direct children of a folder.
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteFile>, DriveError> {
        self.find_files(&format!("{} in parents", quote(folder_id)))
            .await
    }

    /// Export a native document as plain text.
    async fn export_text(&self, file_id: &str) -> Result<String, DriveError>;

    /// Download the raw bytes of a stored file.
    async fn download(&self, file_id: &str) -> Result<Download, DriveError>;

    async fn create_file(
        &self,
        name: &str,
        mime_type: &str,
        parent_id: Option<&str>,
    ) -> Result<RemoteFile, DriveError>;

    async fn create_permission(&self, file_id: &str, permission: &Permission) -> Result<(), DriveError>;
}

/// Quote a value for use inside a Drive query.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
