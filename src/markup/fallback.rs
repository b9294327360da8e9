//! Plain line parser for article markup.
//!
//! Reads `key: value` header lines up to `[+content]` (or the first `{.` block), then
//! turns every non-blank body line into a text block. `{.kind}` ... `{}` sections become
//! a single block whose value holds their `key: value` lines.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::document::{canonical_key, FIELD_ORDER};

static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 _\-]*?)\s*:\s*(.*)$").expect("header pattern"));
static OPEN_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\{\s*\.\s*([A-Za-z0-9_\-]+)\s*\}\s*$").expect("block pattern"));
static CLOSE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\{\s*\}\s*$").expect("close pattern"));
static ARRAY_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[\s*\+?[A-Za-z0-9_\-.]*\s*\]\s*$").expect("array pattern"));

pub fn parse(text: &str) -> Map<String, Value> {
    let mut header: Map<String, Value> = FIELD_ORDER
        .iter()
        .filter(|key| **key != "content")
        .map(|key| (key.to_string(), Value::String(String::new())))
        .collect();
    let mut content: Vec<Value> = Vec::new();

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.peek() {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("[+content]") {
            lines.next();
            break;
        }
        if trimmed.starts_with("{.") {
            break;
        }
        if let Some(caps) = HEADER.captures(line) {
            if let Some(key) = canonical_key(&caps[1]).filter(|key| *key != "content") {
                header.insert(key.to_string(), Value::String(caps[2].trim().to_string()));
            }
        }
        lines.next();
    }

    let mut open: Option<(String, Map<String, Value>)> = None;
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(caps) = OPEN_BLOCK.captures(trimmed) {
            if let Some((kind, value)) = open.take() {
                content.push(block(&kind, Value::Object(value)));
            }
            open = Some((caps[1].to_ascii_lowercase(), Map::new()));
            continue;
        }
        if CLOSE_BLOCK.is_match(trimmed) {
            if let Some((kind, value)) = open.take() {
                content.push(block(&kind, Value::Object(value)));
            }
            continue;
        }
        if let Some((_, value)) = open.as_mut() {
            if let Some(caps) = HEADER.captures(trimmed) {
                value.insert(
                    caps[1].trim().to_ascii_lowercase(),
                    Value::String(caps[2].trim().to_string()),
                );
            }
            continue;
        }
        if ARRAY_MARKER.is_match(trimmed) {
            continue;
        }
        content.push(block("text", Value::String(trimmed.to_string())));
    }
    if let Some((kind, value)) = open {
        content.push(block(&kind, Value::Object(value)));
    }

    header.insert("content".to_string(), Value::Array(content));
    header
}

fn block(kind: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(kind.to_string()));
    map.insert("value".to_string(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::ArticleDocument;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_single_pull_block() {
        let doc = ArticleDocument::from_map(parse("{.pull}\ncaption: Hello\n{}"));
        let out = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            out["content"],
            json!([{"type": "pull", "value": {"caption": "Hello"}}])
        );
    }

    #[test]
    fn test_header_and_body() {
        let text = "\
Headline: Bruins win
cover image: a.jpg
kicker: ignored

[+content]
First paragraph.

{.pull}
caption: Big quote
{}
Last paragraph.
[]
";
        let map = parse(text);
        assert_eq!(map["headline"], "Bruins win");
        assert_eq!(map["coverImage"], "a.jpg");
        assert_eq!(map["author"], "");
        assert!(map.get("kicker").is_none());
        assert_eq!(
            map["content"],
            json!([
                {"type": "text", "value": "First paragraph."},
                {"type": "pull", "value": {"caption": "Big quote"}},
                {"type": "text", "value": "Last paragraph."},
            ])
        );
    }

    #[test]
    fn test_every_known_key_defaults_to_empty() {
        let map = parse("just a body line");
        for key in FIELD_ORDER.iter().filter(|key| **key != "content") {
            assert_eq!(map[*key], "", "{key}");
        }
        assert_eq!(map["content"], json!([]));
    }
}
