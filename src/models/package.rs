//! Package model: an editorial article bundle mirrored against a Drive folder.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::markup::MarkupEntry;

/// Section a package is published under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Prime,
    Flatpages,
    Alumni,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Prime => "prime",
            Category::Flatpages => "flatpages",
            Category::Alumni => "alumni",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "prime" => Some(Category::Prime),
            "flatpages" => Some(Category::Flatpages),
            "alumni" => Some(Category::Alumni),
            _ => None,
        }
    }
}

/// Pointer to an image that lives in Drive. Bytes are never copied for these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteImage {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Image copied into the local blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CachedImage {
    pub name: String,
    pub id: String,
    pub content_type: String,
}

/// Image references by provenance. `gridfs` is authoritative once present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PackageImages {
    #[serde(default)]
    pub gdrive: Vec<RemoteImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gridfs: Option<Vec<CachedImage>>,
}

/// Markup files keyed by file name, plus the blob ids of their cached copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PackageData {
    #[serde(rename = "_blob_ids", default, skip_serializing_if = "IndexMap::is_empty")]
    pub blob_ids: IndexMap<String, String>,
    #[serde(flatten)]
    pub files: IndexMap<String, MarkupEntry>,
}

impl PackageData {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.blob_ids.is_empty()
    }
}

/// A package as stored and returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_folder_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_folder_id: Option<String>,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetched_date: Option<String>,
    #[serde(default)]
    pub cached_article_preview: String,
    #[serde(default)]
    pub images: PackageImages,
    #[serde(default)]
    pub data: PackageData,
    #[serde(default)]
    pub processing: bool,
}

impl Package {
    /// A fresh package with no remote folder and nothing cached.
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            slug: slug.into(),
            description: String::new(),
            remote_folder_url: None,
            remote_folder_id: None,
            category: Category::default(),
            publish_date: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            last_fetched_date: None,
            cached_article_preview: String::new(),
            images: PackageImages::default(),
            data: PackageData::default(),
            processing: false,
        }
    }
}

/// Request body for creating a package.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePackageRequest {
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub remote_folder_url: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub publish_date: Option<String>,
}

/// Request body for updating a package. The slug is immutable.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePackageRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub remote_folder_url: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub publish_date: Option<String>,
}

/// Query parameters for listing packages.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PackageListQuery {
    #[serde(default)]
    pub category: Option<String>,
}

/// Response body of a fetch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub slug: String,
    pub article: String,
    pub data_map: PackageData,
    pub images: Vec<DisplayImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetched_date: Option<String>,
}

/// Image entry as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayImage {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}
