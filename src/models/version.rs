//! Append-only fetch history.

use serde::{Deserialize, Serialize};

use super::PackageData;

/// Snapshot recorded after each fetch. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageVersion {
    pub id: i64,
    pub package_id: String,
    pub article_text: String,
    pub data: PackageData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    pub description: String,
    pub created_at: String,
}

/// Fields for a new ledger entry.
#[derive(Debug, Clone)]
pub struct NewPackageVersion {
    pub package_id: String,
    pub article_text: String,
    pub data: PackageData,
    pub creator_id: Option<String>,
    pub description: String,
}

/// Description stored with every fetch snapshot.
pub fn version_description(at: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "New PackageVersion created on {}",
        at.format("%Y-%m-%d %H:%M:%S")
    )
}
