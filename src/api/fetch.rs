//! Fetch endpoint.

use std::path::Path as FsPath;

use axum::extract::{Path, State};

use super::{success, ApiResult};
use crate::auth::Actor;
use crate::errors::AppError;
use crate::fetch::format_images;
use crate::markup::{parse_entry, MarkupMode};
use crate::models::{FetchResponse, PackageData};
use crate::AppState;

/// File name of the local sample inside `<sample dir>/<slug>/`.
const SAMPLE_FILE: &str = "article.aml";

/// POST /api/packages/:slug/fetch - Refresh a package from Drive.
///
/// When the folder could not be listed a local sample is served instead, if one exists.
pub async fn fetch_package(
    State(state): State<AppState>,
    actor: Actor,
    Path(slug): Path<String>,
) -> ApiResult<FetchResponse> {
    let outcome = state.fetcher.fetch_package(&slug, actor.user()).await?;
    let package = outcome.package;

    let (article, data_map) = if outcome.listing.is_listed() {
        (package.cached_article_preview, package.data)
    } else {
        let Some(text) = read_sample(&state.config.sample_data_dir, &slug).await else {
            return Err(AppError::Internal(
                "Unable to fetch package content from Drive and no local sample available."
                    .to_string(),
            ));
        };
        tracing::info!(slug = %slug, listing = ?outcome.listing, "Serving local sample");
        (text.clone(), sample_data(&text, state.config.markup_mode))
    };

    success(FetchResponse {
        slug: package.slug,
        article,
        data_map,
        images: format_images(&package.images),
        last_fetched_date: package.last_fetched_date,
    })
}

fn sample_data(text: &str, mode: MarkupMode) -> PackageData {
    let mut data = PackageData::default();
    data.files
        .insert(SAMPLE_FILE.to_string(), parse_entry(text, mode));
    data
}

async fn read_sample(dir: &FsPath, slug: &str) -> Option<String> {
    if slug.is_empty() || slug.contains(['/', '\\']) || slug.starts_with('.') {
        return None;
    }
    let path = dir.join(slug).join(SAMPLE_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::debug!(path = %path.display(), "No local sample: {}", e);
            None
        }
    }
}
