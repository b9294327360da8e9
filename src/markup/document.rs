//! Structured article document produced from a markup file.

use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use super::repair;

/// Top-level keys in the order they are written out. `content` is held separately.
pub const FIELD_ORDER: [&str; 12] = [
    "author",
    "content",
    "excerpt",
    "updated",
    "coverAlt",
    "coverImage",
    "headline",
    "authorBio",
    "coverCredit",
    "articleType",
    "authorEmail",
    "authorTwitter",
];

/// Field order for `image` blocks.
pub const IMAGE_FIELD_ORDER: [&str; 4] = ["alt", "url", "credit", "caption"];

/// Map a raw document key onto its canonical spelling.
///
/// Matching ignores case, spaces, underscores and hyphens, and accepts the short
/// legacy spellings (`coverimg`, `covercred`).
pub fn canonical_key(raw: &str) -> Option<&'static str> {
    let folded: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect();
    let key = match folded.as_str() {
        "author" => "author",
        "content" => "content",
        "excerpt" => "excerpt",
        "updated" => "updated",
        "coveralt" => "coverAlt",
        "coverimage" | "coverimg" => "coverImage",
        "headline" => "headline",
        "authorbio" => "authorBio",
        "covercredit" | "covercred" => "coverCredit",
        "articletype" => "articleType",
        "authoremail" => "authorEmail",
        "authortwitter" => "authorTwitter",
        _ => return None,
    };
    Some(key)
}

/// One entry of an article body.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(String),
    Image(ImageBlock),
    Pull(PullQuote),
    /// Any other `{type, value}` pair, kept verbatim.
    Other { kind: String, value: Value },
}

/// Image block fields, held in `alt, url, credit, caption` order with extras after.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageBlock {
    fields: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PullQuote {
    pub caption: String,
    pub extra: IndexMap<String, Value>,
}

impl ImageBlock {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            fields: repair::reorder_image_fields(map).into_iter().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl Block {
    pub fn kind(&self) -> &str {
        match self {
            Block::Text(_) => "text",
            Block::Image(_) => "image",
            Block::Pull(_) => "pull",
            Block::Other { kind, .. } => kind,
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Block::Text(text) => Value::String(text.clone()),
            Block::Image(image) => Value::Object(
                image
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            Block::Pull(pull) => {
                let mut map = Map::new();
                map.insert("caption".to_string(), Value::String(pull.caption.clone()));
                for (k, v) in &pull.extra {
                    map.insert(k.clone(), v.clone());
                }
                Value::Object(map)
            }
            Block::Other { value, .. } => value.clone(),
        }
    }

    /// Convert a raw `{type, value}` object into a typed block.
    pub fn from_raw(mut raw: Map<String, Value>) -> Self {
        let kind = raw
            .shift_remove("type")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let value = raw.shift_remove("value").unwrap_or(Value::Null);
        match (kind.as_str(), value) {
            ("text", Value::String(text)) => Block::Text(text),
            ("image", Value::Object(map)) => Block::Image(ImageBlock::from_map(map)),
            ("pull", Value::Object(mut map)) => {
                let caption = map
                    .shift_remove("caption")
                    .map(|v| match v {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                Block::Pull(PullQuote {
                    caption,
                    extra: map.into_iter().collect(),
                })
            }
            ("pull", Value::Null) => Block::Pull(PullQuote::default()),
            (_, value) => Block::Other { kind, value },
        }
    }
}

impl Serialize for Block {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", self.kind())?;
        map.serialize_entry("value", &self.value())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Block::from_raw(raw))
    }
}

/// A parsed article: header fields plus the ordered `content` body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArticleDocument {
    pub content: Vec<Block>,
    fields: IndexMap<String, Value>,
}

impl ArticleDocument {
    /// Build a document from a raw parse result, applying the block repairs and
    /// canonical key ordering.
    pub fn from_map(mut raw: Map<String, Value>) -> Self {
        let content = match raw.shift_remove("content") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => map,
                    Value::String(text) => raw_block("text", Value::String(text)),
                    other => raw_block("", other),
                })
                .collect(),
            Some(Value::String(text)) => vec![raw_block("text", Value::String(text))],
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![raw_block("", other)],
        };
        let content = repair::merge_split_pulls(content)
            .into_iter()
            .map(Block::from_raw)
            .collect();

        let mut known: IndexMap<&'static str, Value> = IndexMap::new();
        let mut extra: IndexMap<String, Value> = IndexMap::new();
        for (key, value) in raw {
            match canonical_key(&key) {
                Some("content") => {
                    extra.insert(key, value);
                }
                Some(canonical) => {
                    known.entry(canonical).or_insert(value);
                }
                None => {
                    extra.insert(key, value);
                }
            }
        }

        let mut fields = IndexMap::new();
        for key in FIELD_ORDER {
            if let Some(value) = known.shift_remove(key) {
                fields.insert(key.to_string(), value);
            }
        }
        fields.extend(extra);

        Self { content, fields }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn set_field(&mut self, key: &str, value: impl Into<Value>) {
        let key = canonical_key(key).map(str::to_string).unwrap_or_else(|| key.to_string());
        self.fields.insert(key, value.into());
        self.reorder();
    }

    /// Keys in output order, `content` included.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.fields.len() + 1);
        let mut content_written = false;
        for key in self.fields.keys() {
            if !content_written && key != "author" {
                keys.push("content");
                content_written = true;
            }
            keys.push(key.as_str());
        }
        if !content_written {
            keys.push("content");
        }
        keys
    }

    fn reorder(&mut self) {
        let mut fields = std::mem::take(&mut self.fields);
        let mut ordered = IndexMap::with_capacity(fields.len());
        for key in FIELD_ORDER {
            if let Some(value) = fields.shift_remove(key) {
                ordered.insert(key.to_string(), value);
            }
        }
        ordered.extend(fields);
        self.fields = ordered;
    }
}

fn raw_block(kind: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(kind.to_string()));
    map.insert("value".to_string(), value);
    map
}

impl Serialize for ArticleDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        for key in self.keys() {
            if key == "content" {
                map.serialize_entry("content", &self.content)?;
            } else if let Some(value) = self.fields.get(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ArticleDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        Ok(ArticleDocument::from_map(raw))
    }
}
