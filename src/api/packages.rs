//! Package API endpoints.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::Response,
    Json,
};

use super::{success, ApiResult};
use crate::drive::DriveError;
use crate::errors::AppError;
use crate::models::{
    Category, CreatePackageRequest, Package, PackageListQuery, PackageVersion,
    UpdatePackageRequest,
};
use crate::AppState;

async fn load_package(state: &AppState, slug: &str) -> Result<Package, AppError> {
    state
        .repo
        .get_package(slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Package {} not found", slug)))
}

/// GET /api/packages - List packages, optionally by category.
pub async fn list_packages(
    State(state): State<AppState>,
    Query(query): Query<PackageListQuery>,
) -> ApiResult<Vec<Package>> {
    let category = match query.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            Category::from_str(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown category {}", raw)))?,
        ),
        None => None,
    };

    success(state.repo.list_packages(category).await?)
}

/// GET /api/packages/:slug - Get a single package.
pub async fn get_package(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult<Package> {
    success(load_package(&state, &slug).await?)
}

/// GET /api/packages/by-category/:category/:slug - Get a package within a category.
pub async fn get_package_by_category(
    State(state): State<AppState>,
    Path((category, slug)): Path<(String, String)>,
) -> ApiResult<Package> {
    let category = Category::from_str(category.trim())
        .ok_or_else(|| AppError::Validation(format!("Unknown category {}", category)))?;

    let package = state
        .repo
        .get_package_in_category(category, &slug)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Package {} not found in {}", slug, category.as_str()))
        })?;
    success(package)
}

/// POST /api/packages - Create a package and provision its Drive folder.
pub async fn create_package(
    State(state): State<AppState>,
    Json(request): Json<CreatePackageRequest>,
) -> ApiResult<Package> {
    if request.slug.trim().is_empty() {
        return Err(AppError::Validation("Slug is required".to_string()));
    }

    let mut package = state.repo.create_package(&request).await?;
    state.provisioner.provision(&mut package).await?;

    tracing::info!(slug = %package.slug, "Created package");
    success(package)
}

/// PUT /api/packages/:slug - Update a package. A changed folder link is re-provisioned.
pub async fn update_package(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(request): Json<UpdatePackageRequest>,
) -> ApiResult<Package> {
    let mut package = load_package(&state, &slug).await?;

    if let Some(description) = request.description {
        package.description = description;
    }
    if let Some(category) = request.category {
        package.category = category;
    }
    if let Some(publish_date) = request.publish_date {
        package.publish_date = Some(publish_date).filter(|d| !d.trim().is_empty());
    }

    let relink = match request.remote_folder_url {
        Some(url) => {
            let url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
            let changed = url != package.remote_folder_url;
            if changed {
                package.remote_folder_url = url;
                package.remote_folder_id = None;
            }
            changed
        }
        None => false,
    };

    if relink {
        state.provisioner.provision(&mut package).await?;
    } else {
        state.repo.save_package(&package).await?;
    }

    success(package)
}

/// DELETE /api/packages/:slug - Delete a package and its version history.
pub async fn delete_package(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult<()> {
    let _guard = state.fetcher.lock(&slug).await;
    state.repo.delete_package(&slug).await?;
    tracing::info!(slug = %slug, "Deleted package");
    success(())
}

/// GET /api/packages/:slug/versions - Fetch history, newest first.
pub async fn list_versions(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Vec<PackageVersion>> {
    let package = load_package(&state, &slug).await?;
    success(state.repo.list_versions(&package.id).await?)
}

/// GET /api/packages/:slug/image/:file_id - Stream an image of the package from Drive.
pub async fn proxy_image(
    State(state): State<AppState>,
    Path((slug, file_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let package = load_package(&state, &slug).await?;
    let image = package
        .images
        .gdrive
        .iter()
        .find(|image| image.id.as_deref() == Some(file_id.as_str()))
        .ok_or_else(|| AppError::NotFound(format!("Image {} not found in {}", file_id, slug)))?;

    let drive = state
        .drive
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("Drive credentials are not configured".to_string()))?;
    let download = tokio::time::timeout(state.config.remote_timeout, drive.download(&file_id))
        .await
        .map_err(|_| DriveError::Timeout)??;

    let content_type = download.content_type.unwrap_or_else(|| {
        mime_guess::from_path(&image.name)
            .first_or_octet_stream()
            .to_string()
    });

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "private, max-age=300")
        .body(Body::from(download.bytes))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
