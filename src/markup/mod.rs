//! ArchieML markup parsing.
//!
//! Markup files are parsed into an [`ArticleDocument`]. Text that cannot be parsed is
//! kept verbatim as [`MarkupEntry::Raw`] so a fetch never loses a file.

mod archieml;
mod document;
mod fallback;
mod repair;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use document::ArticleDocument;

/// Which parser handles markup files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkupMode {
    /// Full ArchieML parser.
    #[default]
    Structured,
    /// Line-based header and body parser for documents the structured parser mangles.
    Plain,
}

impl MarkupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkupMode::Structured => "structured",
            MarkupMode::Plain => "plain",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" | "archieml" => Some(MarkupMode::Structured),
            "plain" | "fallback" => Some(MarkupMode::Plain),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("markup document is empty")]
    Empty,
    #[error("markup document has no recognizable keys")]
    NoKeys,
}

/// A stored markup file: parsed when possible, otherwise the raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarkupEntry {
    Parsed(ArticleDocument),
    Raw(String),
}

impl MarkupEntry {
    pub fn as_document(&self) -> Option<&ArticleDocument> {
        match self {
            MarkupEntry::Parsed(doc) => Some(doc),
            MarkupEntry::Raw(_) => None,
        }
    }
}

/// Parse one markup file.
pub fn parse(text: &str, mode: MarkupMode) -> Result<ArticleDocument, ParseFailure> {
    if text.trim().is_empty() {
        return Err(ParseFailure::Empty);
    }
    let raw = match mode {
        MarkupMode::Structured => archieml::parse(text),
        MarkupMode::Plain => fallback::parse(text),
    };
    if raw.is_empty() {
        return Err(ParseFailure::NoKeys);
    }
    Ok(ArticleDocument::from_map(raw))
}

/// Parse one markup file, keeping the raw text when parsing fails.
pub fn parse_entry(text: &str, mode: MarkupMode) -> MarkupEntry {
    match parse(text, mode) {
        Ok(doc) => MarkupEntry::Parsed(doc),
        Err(err) => {
            tracing::debug!("Keeping markup as raw text: {}", err);
            MarkupEntry::Raw(text.to_string())
        }
    }
}
