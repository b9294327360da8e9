//! The fetch cycle: mirror a package's Drive folder into the package record.
//!
//! A fetch never fails halfway. Remote problems degrade the result (a file is skipped,
//! stored raw, or the listing comes back empty) and the package is always persisted
//! with `processing` cleared and a new ledger entry appended.

mod images;
mod locks;

pub use images::format_images;
pub use locks::KeyedLocks;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::blobs::{asset_type, AssetEntry, BlobMetadata, BlobStore, TEXT_CONTENT_TYPE};
use crate::config::FetchSettings;
use crate::db::Repository;
use crate::drive::{folder_id_from_url, DriveApi, DriveError, RemoteFile, GOOGLE_DOC_MIME};
use crate::errors::AppError;
use crate::markup::{parse_entry, MarkupEntry};
use crate::models::{
    version_description, CachedImage, NewPackageVersion, Package, PackageData, PackageImages,
    RemoteImage, User,
};

/// Source recorded for blobs copied from Drive.
const SOURCE_GDRIVE: &str = "gdrive";

/// What happened to the folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingStatus {
    /// The folder was listed with this many entries.
    Listed(usize),
    /// No credentials or no folder to list.
    Unavailable,
    /// The listing call failed.
    Failed(String),
}

impl ListingStatus {
    pub fn is_listed(&self) -> bool {
        matches!(self, ListingStatus::Listed(_))
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub package: Package,
    pub listing: ListingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Markup,
    Article,
    Image,
    Ignored,
}

fn classify(file: &RemoteFile) -> FileKind {
    let name = file.name.to_lowercase();
    if name.ends_with(".aml") {
        FileKind::Markup
    } else if name.starts_with("article") && file.mime_type == GOOGLE_DOC_MIME {
        FileKind::Article
    } else if file.mime_type.starts_with("image") {
        FileKind::Image
    } else {
        FileKind::Ignored
    }
}

/// Everything collected from one folder listing.
#[derive(Debug, Default)]
struct Harvest {
    markup: IndexMap<String, MarkupEntry>,
    blob_ids: IndexMap<String, String>,
    article: String,
    gdrive: Vec<RemoteImage>,
    gridfs: Vec<CachedImage>,
    assets: Vec<AssetEntry>,
}

pub struct FetchService {
    repo: Repository,
    blobs: Arc<dyn BlobStore>,
    drive: Option<Arc<dyn DriveApi>>,
    settings: FetchSettings,
    locks: KeyedLocks,
}

impl FetchService {
    pub fn new(
        repo: Repository,
        blobs: Arc<dyn BlobStore>,
        drive: Option<Arc<dyn DriveApi>>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            repo,
            blobs,
            drive,
            settings,
            locks: KeyedLocks::new(),
        }
    }

    /// Hold the per-slug fetch lock. Used by deletes so a running fetch never records
    /// a version for a package that is already gone.
    pub async fn lock(&self, slug: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.locks.lock(slug).await
    }

    /// Run one fetch cycle for `slug`.
    ///
    /// Only a missing package or a failure to load it is an error. Fetches of the same
    /// slug run one at a time. Only the fetch-owned columns are written, so edits made
    /// through the API while a fetch runs survive it.
    pub async fn fetch_package(&self, slug: &str, actor: Option<&User>) -> Result<FetchOutcome, AppError> {
        let _guard = self.locks.lock(slug).await;
        let started = Instant::now();

        let mut package = self
            .repo
            .get_package(slug)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Package {} not found", slug)))?;

        package.processing = true;
        if let Err(e) = self.repo.save_fetch_state(&package).await {
            tracing::warn!(slug, "Could not mark package as processing: {}", e);
        }

        let mut harvest = Harvest::default();
        let listing = match self.list_folder(&package).await {
            Ok((drive, files)) => {
                for file in &files {
                    self.harvest_file(drive, slug, file, &mut harvest).await;
                }
                ListingStatus::Listed(files.len())
            }
            Err(status) => status,
        };

        if self.settings.blob_cache_enabled
            && harvest.markup.is_empty()
            && !harvest.article.trim().is_empty()
        {
            self.synthesize_article(slug, &mut harvest).await;
        }

        self.merge(&mut package, harvest).await;

        let now = Utc::now();
        package.last_fetched_date = Some(now.to_rfc3339());
        package.processing = false;
        if let Err(e) = self.repo.save_fetch_state(&package).await {
            tracing::error!(slug, "Could not persist fetched package: {}", e);
        }

        self.record_version(&package, actor, now).await;

        // Pick up edits that landed while the folder was being read.
        match self.repo.get_package(slug).await {
            Ok(Some(current)) => package = current,
            Ok(None) => tracing::warn!(slug, "Package deleted during fetch"),
            Err(e) => tracing::warn!(slug, "Could not reload fetched package: {}", e),
        }

        tracing::info!(
            slug,
            listing = ?listing,
            files = package.data.files.len(),
            images = package.images.gdrive.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched package"
        );
        Ok(FetchOutcome { package, listing })
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, DriveError>>) -> Result<T, DriveError> {
        tokio::time::timeout(self.settings.remote_timeout, call)
            .await
            .map_err(|_| DriveError::Timeout)?
    }

    async fn list_folder(&self, package: &Package) -> Result<(&dyn DriveApi, Vec<RemoteFile>), ListingStatus> {
        let Some(drive) = self.drive.as_deref() else {
            tracing::warn!(slug = %package.slug, "No Drive credentials; skipping listing");
            return Err(ListingStatus::Unavailable);
        };
        let folder_id = package.remote_folder_id.clone().or_else(|| {
            package
                .remote_folder_url
                .as_deref()
                .and_then(folder_id_from_url)
        });
        let Some(folder_id) = folder_id else {
            tracing::warn!(slug = %package.slug, "Package has no folder to list");
            return Err(ListingStatus::Unavailable);
        };

        match self.bounded(drive.list_children(&folder_id)).await {
            Ok(files) => Ok((drive, files)),
            Err(e) => {
                tracing::warn!(slug = %package.slug, folder_id = %folder_id, "Folder listing failed: {}", e);
                Err(ListingStatus::Failed(e.to_string()))
            }
        }
    }

    async fn harvest_file(&self, drive: &dyn DriveApi, slug: &str, file: &RemoteFile, harvest: &mut Harvest) {
        let kind = classify(file);
        tracing::debug!(slug, name = %file.name, kind = ?kind, "Processing remote file");
        match kind {
            FileKind::Markup => self.harvest_markup(drive, slug, file, harvest).await,
            FileKind::Article => match self.bounded(drive.export_text(&file.id)).await {
                Ok(text) => harvest.article = text,
                Err(e) => tracing::warn!(slug, name = %file.name, "Article export failed: {}", e),
            },
            FileKind::Image => self.harvest_image(drive, slug, file, harvest).await,
            FileKind::Ignored => {}
        }
    }

    async fn read_text(&self, drive: &dyn DriveApi, file: &RemoteFile) -> Result<String, DriveError> {
        if file.mime_type == GOOGLE_DOC_MIME {
            return self.bounded(drive.export_text(&file.id)).await;
        }
        let download = self.bounded(drive.download(&file.id)).await?;
        Ok(String::from_utf8_lossy(&download.bytes).into_owned())
    }

    async fn harvest_markup(&self, drive: &dyn DriveApi, slug: &str, file: &RemoteFile, harvest: &mut Harvest) {
        let text = match self.read_text(drive, file).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(slug, name = %file.name, "Markup download failed: {}", e);
                harvest
                    .markup
                    .insert(file.name.clone(), MarkupEntry::Raw(String::new()));
                return;
            }
        };

        harvest
            .markup
            .insert(file.name.clone(), parse_entry(&text, self.settings.markup_mode));

        if self.settings.blob_cache_enabled {
            self.cache_text(slug, &file.name, &text, Some(&file.id), harvest)
                .await;
        }
    }

    async fn harvest_image(&self, drive: &dyn DriveApi, slug: &str, file: &RemoteFile, harvest: &mut Harvest) {
        let url = file
            .web_content_link
            .clone()
            .or_else(|| file.web_view_link.clone())
            .unwrap_or_default();
        harvest.gdrive.push(RemoteImage {
            name: file.name.clone(),
            url,
            id: Some(file.id.clone()),
        });

        if !self.settings.blob_cache_enabled {
            return;
        }

        let download = match self.bounded(drive.download(&file.id)).await {
            Ok(download) => download,
            Err(e) => {
                tracing::warn!(slug, name = %file.name, "Image download failed: {}", e);
                return;
            }
        };
        let metadata = BlobMetadata {
            slug: slug.to_string(),
            asset_type: asset_type::IMAGE.to_string(),
            source: SOURCE_GDRIVE.to_string(),
            source_id: Some(file.id.clone()),
        };
        match self
            .blobs
            .put(&file.name, &download.bytes, &file.mime_type, &metadata)
            .await
        {
            Ok(blob_id) => {
                harvest.gridfs.push(CachedImage {
                    name: file.name.clone(),
                    id: blob_id.clone(),
                    content_type: file.mime_type.clone(),
                });
                harvest.assets.push(AssetEntry {
                    blob_id,
                    name: file.name.clone(),
                    asset_type: asset_type::IMAGE.to_string(),
                    content_type: file.mime_type.clone(),
                    source: SOURCE_GDRIVE.to_string(),
                    source_id: Some(file.id.clone()),
                });
            }
            Err(e) => tracing::warn!(slug, name = %file.name, "Could not cache image: {}", e),
        }
    }

    async fn cache_text(
        &self,
        slug: &str,
        name: &str,
        text: &str,
        source_id: Option<&str>,
        harvest: &mut Harvest,
    ) {
        let metadata = BlobMetadata {
            slug: slug.to_string(),
            asset_type: asset_type::AML.to_string(),
            source: SOURCE_GDRIVE.to_string(),
            source_id: source_id.map(str::to_string),
        };
        match self.blobs.put_text(name, text, &metadata).await {
            Ok(blob_id) => {
                harvest.blob_ids.insert(name.to_string(), blob_id.clone());
                harvest.assets.push(AssetEntry {
                    blob_id,
                    name: name.to_string(),
                    asset_type: asset_type::AML.to_string(),
                    content_type: TEXT_CONTENT_TYPE.to_string(),
                    source: SOURCE_GDRIVE.to_string(),
                    source_id: metadata.source_id,
                });
            }
            Err(e) => tracing::warn!(slug, name, "Could not cache markup: {}", e),
        }
    }

    /// Folders holding only the article document still get a markup entry.
    async fn synthesize_article(&self, slug: &str, harvest: &mut Harvest) {
        let name = format!("{}-article.aml", slug);
        let text = harvest.article.clone();
        harvest
            .markup
            .insert(name.clone(), parse_entry(&text, self.settings.markup_mode));
        self.cache_text(slug, &name, &text, None, harvest).await;
    }

    async fn merge(&self, package: &mut Package, harvest: Harvest) {
        if !harvest.article.is_empty() {
            package.cached_article_preview = harvest.article;
        }

        let caching = self.settings.blob_cache_enabled;
        package.images = PackageImages {
            gdrive: harvest.gdrive,
            gridfs: caching.then_some(harvest.gridfs),
        };
        package.data = PackageData {
            blob_ids: harvest.blob_ids,
            files: harvest.markup,
        };

        if caching {
            if let Err(e) = self.blobs.index_assets(&package.slug, &harvest.assets).await {
                tracing::warn!(slug = %package.slug, "Could not update asset index: {}", e);
            }
        }
    }

    async fn record_version(&self, package: &Package, actor: Option<&User>, now: DateTime<Utc>) {
        let version = NewPackageVersion {
            package_id: package.id.clone(),
            article_text: package.cached_article_preview.clone(),
            data: package.data.clone(),
            creator_id: actor.map(|user| user.id.clone()),
            description: version_description(now),
        };
        if let Err(e) = self.repo.insert_version(&version).await {
            tracing::warn!(slug = %package.slug, "Could not record package version: {}", e);
        }
    }
}
