//! Line-oriented ArchieML parser.
//!
//! Supports the subset used by article documents: `key: value` with dotted keys,
//! `:end` multi-line values, `{scope}`/`{.scope}`/`{}`, `[array]`/`[.array]`/`[]`,
//! freeform `[+array]` blocks, `* item` string arrays, `:skip`/`:endskip`,
//! `:ignore` and leading `\` escapes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*:[ \t\r]*(endskip|ignore|skip|end)(?:[^A-Za-z0-9_\-].*)?$")
        .expect("command pattern")
});
static SCOPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\{[ \t\r]*([+.]*)[ \t\r]*([A-Za-z0-9_\-.]*)[ \t\r]*\}").expect("scope pattern")
});
static ARRAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\[[ \t\r]*([+.]*)[ \t\r]*([A-Za-z0-9_\-.]*)[ \t\r]*\]").expect("array pattern")
});
static KEY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9_\-.]+)[ \t\r]*:[ \t\r]*(.*)$").expect("key pattern")
});
static ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\*[ \t\r]*(.*)$").expect("item pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayKind {
    /// No item seen yet.
    Pending,
    Strings,
    Objects,
    Freeform,
}

#[derive(Debug)]
enum Container {
    Object(Map<String, Value>),
    Array { items: Vec<Value>, kind: ArrayKind },
}

/// Where a frame's value goes when it is closed.
#[derive(Debug)]
enum Dest {
    Root,
    Path(Vec<String>),
    /// A `{.kind}` or `[.kind]` opened inside a freeform array becomes `{type: kind, value}`.
    FreeformItem(String),
    /// A `{.name}` opened inside an object array becomes its next item.
    Item,
}

#[derive(Debug)]
struct Frame {
    container: Container,
    dest: Dest,
}

/// The last value written, which `:end` may extend with the lines that followed it.
#[derive(Debug)]
struct Pending {
    depth: usize,
    item: Option<usize>,
    path: Vec<String>,
    first: String,
    lines: Vec<String>,
}

struct Parser {
    stack: Vec<Frame>,
    skipping: bool,
    pending: Option<Pending>,
}

/// Parse ArchieML text into its top-level object.
pub fn parse(text: &str) -> Map<String, Value> {
    let mut parser = Parser {
        stack: vec![Frame {
            container: Container::Object(Map::new()),
            dest: Dest::Root,
        }],
        skipping: false,
        pending: None,
    };
    for line in text.lines() {
        if !parser.feed(line) {
            break;
        }
    }
    parser.finish()
}

impl Parser {
    /// Returns false once `:ignore` is reached.
    fn feed(&mut self, line: &str) -> bool {
        if let Some(caps) = COMMAND.captures(line) {
            let command = caps[1].to_ascii_lowercase();
            if self.skipping {
                if command == "endskip" {
                    self.skipping = false;
                }
                return true;
            }
            match command.as_str() {
                "ignore" => return false,
                "skip" => {
                    self.skipping = true;
                    self.pending = None;
                }
                "end" => self.close_multiline(),
                _ => {}
            }
            return true;
        }
        if self.skipping {
            return true;
        }

        if let Some(caps) = SCOPE.captures(line) {
            self.pending = None;
            self.scope(&caps[1], &caps[2]);
            return true;
        }
        if let Some(caps) = ARRAY.captures(line) {
            self.pending = None;
            self.array(&caps[1], &caps[2]);
            return true;
        }
        if let Some(caps) = KEY_LINE.captures(line) {
            if self.key(&caps[1], caps[2].trim_end()) {
                return true;
            }
        }
        if let Some(caps) = ITEM.captures(line) {
            if self.item(caps[1].trim_end()) {
                return true;
            }
        }
        self.text(line);
        true
    }

    fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    fn top(&mut self) -> &mut Frame {
        let depth = self.depth();
        &mut self.stack[depth]
    }

    fn key(&mut self, key: &str, value: &str) -> bool {
        let depth = self.depth();
        let path = split_key(key);
        if path.is_empty() {
            return false;
        }
        let first = value.to_string();
        let frame = self.top();
        let item = match &mut frame.container {
            Container::Object(map) => {
                set_path(map, &path, Value::String(first.clone()));
                None
            }
            Container::Array { items, kind } => match *kind {
                ArrayKind::Strings => return false,
                ArrayKind::Freeform => {
                    items.push(typed(key, Value::String(first)));
                    self.pending = None;
                    return true;
                }
                ArrayKind::Pending | ArrayKind::Objects => {
                    *kind = ArrayKind::Objects;
                    let starts_new = match items.last() {
                        Some(Value::Object(map)) => map.contains_key(&path[0]),
                        _ => true,
                    };
                    if starts_new {
                        items.push(Value::Object(Map::new()));
                    }
                    if let Some(Value::Object(map)) = items.last_mut() {
                        set_path(map, &path, Value::String(first.clone()));
                    }
                    Some(items.len() - 1)
                }
            },
        };
        self.pending = Some(Pending {
            depth,
            item,
            path,
            first,
            lines: Vec::new(),
        });
        true
    }

    fn item(&mut self, value: &str) -> bool {
        let depth = self.depth();
        let Container::Array { items, kind } = &mut self.top().container else {
            return false;
        };
        if !matches!(kind, ArrayKind::Pending | ArrayKind::Strings) {
            return false;
        }
        *kind = ArrayKind::Strings;
        items.push(Value::String(value.to_string()));
        let index = items.len() - 1;
        self.pending = Some(Pending {
            depth,
            item: Some(index),
            path: Vec::new(),
            first: value.to_string(),
            lines: Vec::new(),
        });
        true
    }

    fn text(&mut self, line: &str) {
        if let Container::Array {
            items,
            kind: ArrayKind::Freeform,
        } = &mut self.top().container
        {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                items.push(typed("text", Value::String(unescape(trimmed).to_string())));
            }
            return;
        }
        if let Some(pending) = self.pending.as_mut() {
            pending.lines.push(line.to_string());
        }
    }

    fn close_multiline(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.lines.is_empty() || pending.depth >= self.stack.len() {
            return;
        }
        let mut text = pending.first;
        for line in &pending.lines {
            text.push('\n');
            text.push_str(unescape(line));
        }
        let value = Value::String(text.trim().to_string());

        match (&mut self.stack[pending.depth].container, pending.item) {
            (Container::Object(map), _) => set_path(map, &pending.path, value),
            (Container::Array { items, .. }, Some(index)) => match items.get_mut(index) {
                Some(slot) if pending.path.is_empty() => *slot = value,
                Some(Value::Object(map)) => set_path(map, &pending.path, value),
                _ => {}
            },
            _ => {}
        }
    }

    fn scope(&mut self, flags: &str, name: &str) {
        if name.is_empty() {
            if self.stack.len() > 1 && matches!(self.top().container, Container::Object(_)) {
                self.pop();
            } else {
                self.close_to_root();
            }
            return;
        }

        let dest = if flags.contains('.') {
            match &self.top().container {
                Container::Array {
                    kind: ArrayKind::Freeform,
                    ..
                } => Dest::FreeformItem(name.to_string()),
                Container::Array { .. } => Dest::Item,
                Container::Object(_) => Dest::Path(split_key(name)),
            }
        } else {
            self.close_to_root();
            Dest::Path(split_key(name))
        };
        if let (Dest::Item, Container::Array { kind, .. }) = (&dest, &mut self.top().container) {
            *kind = ArrayKind::Objects;
        }
        self.stack.push(Frame {
            container: Container::Object(Map::new()),
            dest,
        });
    }

    fn array(&mut self, flags: &str, name: &str) {
        if name.is_empty() {
            let open_array = self
                .stack
                .iter()
                .skip(1)
                .any(|frame| matches!(frame.container, Container::Array { .. }));
            if open_array {
                while self.stack.len() > 1 {
                    let was_array = matches!(self.top().container, Container::Array { .. });
                    self.pop();
                    if was_array {
                        break;
                    }
                }
            } else {
                self.close_to_root();
            }
            return;
        }

        let kind = if flags.contains('+') {
            ArrayKind::Freeform
        } else {
            ArrayKind::Pending
        };
        let dest = if flags.contains('.') {
            match &self.top().container {
                Container::Array {
                    kind: ArrayKind::Freeform,
                    ..
                } => Dest::FreeformItem(name.to_string()),
                _ => Dest::Path(split_key(name)),
            }
        } else {
            self.close_to_root();
            Dest::Path(split_key(name))
        };
        self.stack.push(Frame {
            container: Container::Array {
                items: Vec::new(),
                kind,
            },
            dest,
        });
    }

    fn close_to_root(&mut self) {
        while self.stack.len() > 1 {
            self.pop();
        }
    }

    /// Close the innermost frame and write its value into the parent.
    fn pop(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let value = match frame.container {
            Container::Object(map) => Value::Object(map),
            Container::Array { items, .. } => Value::Array(items),
        };
        let parent = &mut self.top().container;
        match (frame.dest, parent) {
            (Dest::Root, _) => {}
            (Dest::Path(path), Container::Object(map)) => merge_path(map, &path, value),
            (Dest::Path(path), Container::Array { items, kind }) => {
                if *kind == ArrayKind::Freeform {
                    items.push(typed(&path.join("."), value));
                    return;
                }
                *kind = ArrayKind::Objects;
                if !matches!(items.last(), Some(Value::Object(_))) {
                    items.push(Value::Object(Map::new()));
                }
                if let Some(Value::Object(map)) = items.last_mut() {
                    merge_path(map, &path, value);
                }
            }
            (Dest::FreeformItem(kind), Container::Array { items, .. }) => {
                items.push(typed(&kind, value));
            }
            (Dest::FreeformItem(kind), Container::Object(map)) => {
                merge_path(map, &[kind], value);
            }
            (Dest::Item, Container::Array { items, .. }) => items.push(value),
            (Dest::Item, Container::Object(_)) => {}
        }
    }

    fn finish(mut self) -> Map<String, Value> {
        self.close_to_root();
        match self.stack.pop().map(|frame| frame.container) {
            Some(Container::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

fn split_key(key: &str) -> Vec<String> {
    key.split('.')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn unescape(line: &str) -> &str {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix('\\') {
        Some(rest) => rest,
        None => line,
    }
}

fn typed(kind: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(kind.to_string()));
    map.insert("value".to_string(), value);
    Value::Object(map)
}

/// Set `path` inside `map`, replacing non-object intermediates.
fn set_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = map;
    for part in parents {
        let slot = current
            .entry(part.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

/// Like [`set_path`], but a reopened object scope keeps the keys it already had.
fn merge_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    if let Value::Object(incoming) = value {
        if let Some(Value::Object(existing)) = lookup_mut(map, path) {
            existing.extend(incoming);
            return;
        }
        set_path(map, path, Value::Object(incoming));
        return;
    }
    set_path(map, path, value);
}

fn lookup_mut<'a>(map: &'a mut Map<String, Value>, path: &[String]) -> Option<&'a mut Value> {
    let (first, rest) = path.split_first()?;
    let mut current = map.get_mut(first)?;
    for part in rest {
        current = current.as_object_mut()?.get_mut(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parsed(text: &str) -> Value {
        Value::Object(parse(text))
    }

    #[test]
    fn test_simple_keys() {
        assert_eq!(
            parsed("headline: Bruins win\nauthor:   Jo Bruin  \nnot a key line\n"),
            json!({"headline": "Bruins win", "author": "Jo Bruin"})
        );
    }

    #[test]
    fn test_dotted_keys() {
        assert_eq!(
            parsed("cover.url: a.jpg\ncover.alt: A photo\n"),
            json!({"cover": {"url": "a.jpg", "alt": "A photo"}})
        );
    }

    #[test]
    fn test_multiline_value() {
        assert_eq!(
            parsed("excerpt: First line\nsecond line\n\\:end is escaped\n:end\nheadline: H\n"),
            json!({
                "excerpt": "First line\nsecond line\n:end is escaped",
                "headline": "H",
            })
        );
    }

    #[test]
    fn test_lines_without_end_are_ignored() {
        assert_eq!(
            parsed("excerpt: First line\nstray text\nheadline: H\n"),
            json!({"excerpt": "First line", "headline": "H"})
        );
    }

    #[test]
    fn test_scopes() {
        assert_eq!(
            parsed("{meta}\nsection: Sports\n{.social}\ntwitter: dailybruin\n{}\n{}\ntitle: T\n"),
            json!({
                "meta": {"section": "Sports", "social": {"twitter": "dailybruin"}},
                "title": "T",
            })
        );
    }

    #[test]
    fn test_reopened_scope_keeps_keys() {
        assert_eq!(
            parsed("{meta}\na: 1\n{}\n{meta}\nb: 2\n{}\n"),
            json!({"meta": {"a": "1", "b": "2"}})
        );
    }

    #[test]
    fn test_string_array() {
        assert_eq!(
            parsed("[tags]\n* sports\n* basketball\n[]\n"),
            json!({"tags": ["sports", "basketball"]})
        );
    }

    #[test]
    fn test_object_array() {
        assert_eq!(
            parsed("[authors]\nname: A\nrole: writer\nname: B\n[]\n"),
            json!({"authors": [{"name": "A", "role": "writer"}, {"name": "B"}]})
        );
    }

    #[test]
    fn test_freeform_content() {
        let text = "\
headline: H
[+content]
First paragraph.

{.image}
url: https://example.com/a.jpg
caption: A caption
{}
\\author: not a key
Second paragraph.
{.pull}
{}
[]
";
        assert_eq!(
            parsed(text),
            json!({
                "headline": "H",
                "content": [
                    {"type": "text", "value": "First paragraph."},
                    {"type": "image", "value": {"url": "https://example.com/a.jpg", "caption": "A caption"}},
                    {"type": "text", "value": "author: not a key"},
                    {"type": "text", "value": "Second paragraph."},
                    {"type": "pull", "value": {}},
                ],
            })
        );
    }

    #[test]
    fn test_skip_and_ignore() {
        assert_eq!(
            parsed("a: 1\n:skip\nb: 2\n:endskip\nc: 3\n:ignore\nd: 4\n"),
            json!({"a": "1", "c": "3"})
        );
    }

    #[test]
    fn test_no_keys_yields_empty_map() {
        assert!(parse("plain prose\nwith nothing structured").is_empty());
    }
}
