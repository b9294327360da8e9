//! Structural repairs applied to raw content blocks before they are typed.

use serde_json::{Map, Value};

use super::document::IMAGE_FIELD_ORDER;

type RawBlock = Map<String, Value>;

/// Collapse a captionless `pull` block and the untyped caption-carrying block that
/// follows it into a single pull quote.
///
/// Google Docs exports sometimes split a pull quote so that the parser emits
/// `{type: pull, value: {}}` followed by `{value: {caption: ...}}`.
pub fn merge_split_pulls(blocks: Vec<RawBlock>) -> Vec<RawBlock> {
    let mut out = Vec::with_capacity(blocks.len());
    let mut iter = blocks.into_iter().peekable();

    while let Some(mut block) = iter.next() {
        if is_pull(&block) && pull_caption(&block).is_empty() {
            if let Some(caption) = iter.peek().and_then(stray_caption) {
                iter.next();
                let value = block
                    .entry("value")
                    .or_insert_with(|| Value::Object(Map::new()));
                if !value.is_object() {
                    *value = Value::Object(Map::new());
                }
                if let Value::Object(map) = value {
                    map.insert("caption".to_string(), caption);
                }
            }
        }
        out.push(block);
    }

    out
}

/// Order image block fields as `alt, url, credit, caption`, keeping unknown fields after.
pub fn reorder_image_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let mut ordered = Map::new();
    for key in IMAGE_FIELD_ORDER {
        if let Some(value) = fields.shift_remove(key) {
            ordered.insert(key.to_string(), value);
        }
    }
    ordered.extend(fields);
    ordered
}

fn is_pull(block: &RawBlock) -> bool {
    block.get("type").and_then(Value::as_str) == Some("pull")
}

fn pull_caption(block: &RawBlock) -> &str {
    block
        .get("value")
        .and_then(|v| v.get("caption"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
}

fn is_untyped(block: &RawBlock) -> bool {
    match block.get("type") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// The caption of an untyped block, found either at its top level or inside `value`.
fn stray_caption(block: &RawBlock) -> Option<Value> {
    if !is_untyped(block) {
        return None;
    }
    block
        .get("caption")
        .or_else(|| block.get("value").and_then(|v| v.get("caption")))
        .cloned()
}
