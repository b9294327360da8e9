//! Image list shown to clients.

use std::collections::HashSet;

use crate::models::{DisplayImage, PackageImages};

/// Cached copies first, served from `/files/<blobId>`, then remote pointers whose name
/// was not cached.
pub fn format_images(images: &PackageImages) -> Vec<DisplayImage> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for cached in images.gridfs.iter().flatten() {
        if seen.insert(cached.name.clone()) {
            out.push(DisplayImage {
                name: cached.name.clone(),
                url: format!("/files/{}", cached.id),
                content_type: Some(cached.content_type.clone()),
            });
        }
    }

    for remote in &images.gdrive {
        if seen.insert(remote.name.clone()) {
            out.push(DisplayImage {
                name: remote.name.clone(),
                url: remote.url.clone(),
                content_type: None,
            });
        }
    }

    out
}
