//! Blob store for cached markup files, article text and images.
//!
//! Blobs are addressed by a generated id and carry the slug and remote file they came
//! from. Each slug also has an asset index listing what a fetch stored for it.

mod sqlite;

pub use sqlite::SqliteBlobStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content type used for cached markup and article text.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob store database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid asset index: {0}")]
    Index(#[from] serde_json::Error),
}

/// Asset kinds recorded in the index.
pub mod asset_type {
    pub const AML: &str = "aml";
    pub const IMAGE: &str = "image";
}

/// Where a blob came from.
#[derive(Debug, Clone, Default)]
pub struct BlobMetadata {
    pub slug: String,
    pub asset_type: String,
    pub source: String,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// One entry of a slug's asset index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetEntry {
    pub blob_id: String,
    pub name: String,
    pub asset_type: String,
    pub content_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// The asset index of one slug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndex {
    pub slug: String,
    pub assets: Vec<AssetEntry>,
    pub has_aml: bool,
    pub has_images: bool,
    pub updated_at: String,
}

/// Key-value blob storage with a per-slug asset index.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return the new blob id.
    async fn put(
        &self,
        name: &str,
        data: &[u8],
        content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<String, StorageError>;

    /// Store UTF-8 text.
    async fn put_text(
        &self,
        name: &str,
        text: &str,
        metadata: &BlobMetadata,
    ) -> Result<String, StorageError> {
        self.put(name, text.as_bytes(), TEXT_CONTENT_TYPE, metadata)
            .await
    }

    /// Retrieve a blob by id.
    async fn get(&self, id: &str) -> Result<StoredBlob, StorageError>;

    /// Replace the asset index of `slug`.
    async fn index_assets(&self, slug: &str, assets: &[AssetEntry]) -> Result<(), StorageError>;

    /// The asset index of `slug`, if one was ever written.
    async fn asset_index(&self, slug: &str) -> Result<Option<AssetIndex>, StorageError>;
}
