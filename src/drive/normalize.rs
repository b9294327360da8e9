//! Folder id extraction and canonical Drive URLs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::DEFAULT_DRIVE_ROOT;

static ID_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"/folders/([A-Za-z0-9_-]+)").expect("folders pattern"),
        Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").expect("id pattern"),
        Regex::new(r"/d/([A-Za-z0-9_-]+)").expect("doc pattern"),
    ]
});
static SLUG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("slug strip pattern"));
static SLUG_DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").expect("slug dash pattern"));

/// A package's remote folder as far as it is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderRef {
    pub id: Option<String>,
    pub url: Option<String>,
}

/// Canonical link for a folder id.
pub fn folder_url(id: &str) -> String {
    format!("{}/{}", DEFAULT_DRIVE_ROOT, id)
}

/// Pull a Drive id out of a pasted link: `/folders/<id>`, `?id=<id>` or `/d/<id>`,
/// first match wins.
pub fn extract_folder_id(input: &str) -> Option<String> {
    ID_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(input))
        .map(|caps| caps[1].to_string())
}

/// Normalize a user-supplied link against an already known id.
///
/// When no id is known and one can be extracted, the link is rewritten to the
/// canonical folder form, even if it pointed at a document.
pub fn normalize(input: Option<&str>, known_id: Option<&str>) -> FolderRef {
    let url = input.map(str::trim).filter(|s| !s.is_empty());
    let known_id = known_id.map(str::trim).filter(|s| !s.is_empty());

    match (url, known_id) {
        (Some(url), None) => match extract_folder_id(url) {
            Some(id) => FolderRef {
                url: Some(folder_url(&id)),
                id: Some(id),
            },
            None => FolderRef {
                id: None,
                url: Some(url.to_string()),
            },
        },
        (url, Some(id)) => FolderRef {
            id: Some(id.to_string()),
            url: Some(url.map(str::to_string).unwrap_or_else(|| folder_url(id))),
        },
        (None, None) => FolderRef::default(),
    }
}

/// Folder id used by a fetch when none is stored: the last path segment of the URL.
pub fn folder_id_from_url(url: &str) -> Option<String> {
    url.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|segment| segment.split(['?', '#']).next().unwrap_or(segment))
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Deterministic stand-in link used when no folder could be provisioned. It does not
/// point at a real folder.
pub fn placeholder_url(root: &str, slug: &str) -> String {
    let root = match url::Url::parse(root.trim()) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => root.trim(),
        _ => DEFAULT_DRIVE_ROOT,
    };
    format!("{}/{}", root.trim_end_matches('/'), slugify(slug))
}

/// Django-style slug: ASCII only, lowercase, word characters and single dashes.
pub fn slugify(input: &str) -> String {
    let ascii: String = input.chars().filter(char::is_ascii).collect();
    let lowered = ascii.to_lowercase();
    let stripped = SLUG_STRIP.replace_all(&lowered, "");
    let dashed = SLUG_DASHES.replace_all(stripped.trim(), "-");
    dashed.trim_matches(|c| c == '-' || c == '_').to_string()
}
