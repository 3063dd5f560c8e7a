//! Resource snapshots and key path resolution
//!
//! A [`Resource`] is an ordered JSON object describing one cloud object at
//! fetch time. Filters read it through [`KeyPath`] and may attach derived
//! data under the reserved `c7n:` annotation prefix.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Prefix reserved for derived data attached by filters and actions
pub const ANNOTATION_PREFIX: &str = "c7n:";

/// Build the full annotation key for a namespace (`metrics` -> `c7n:metrics`)
pub fn annotation_key(namespace: &str) -> String {
    format!("{ANNOTATION_PREFIX}{namespace}")
}

/// The absent sentinel: the path does not exist in the resource
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("key not found: {path}")]
pub struct NotFound {
    /// The path that failed to resolve
    pub path: String,
}

/// A malformed key path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key path '{path}': {reason}")]
pub struct InvalidPath {
    pub path: String,
    pub reason: String,
}

/// One step of a key path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object member
    Key(String),
    /// Array index; negative values count from the end
    Index(i64),
}

/// A parsed key expression
///
/// Supported forms:
/// - `state.status`, `disks[0].type`, `items[-1]`
/// - quoted members: `labels."app.kubernetes.io/name"`, `["c7n:metrics"]`
/// - `tag:Name` for the `Value` of the `{Key, Value}` entry in `Tags`
/// - `label:env` for `labels.env`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    raw: String,
    kind: PathKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathKind {
    Segments(Vec<PathSegment>),
    Tag(String),
}

impl KeyPath {
    /// Parse a key expression
    pub fn parse(path: &str) -> Result<Self, InvalidPath> {
        let invalid = |reason: &str| InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let kind = if let Some(tag) = path.strip_prefix("tag:") {
            if tag.is_empty() {
                return Err(invalid("empty tag name"));
            }
            PathKind::Tag(tag.to_string())
        } else if let Some(label) = path.strip_prefix("label:") {
            if label.is_empty() {
                return Err(invalid("empty label name"));
            }
            PathKind::Segments(vec![
                PathSegment::Key("labels".to_string()),
                PathSegment::Key(label.to_string()),
            ])
        } else {
            PathKind::Segments(parse_segments(path).map_err(|reason| invalid(&reason))?)
        };

        Ok(Self {
            raw: path.to_string(),
            kind,
        })
    }

    /// The expression as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolve this path against a JSON value
    pub fn resolve<'a>(&self, root: &'a Value) -> Result<&'a Value, NotFound> {
        match root {
            Value::Object(map) => self.resolve_map(map),
            _ => Err(self.not_found()),
        }
    }

    /// Resolve this path against a JSON object
    pub fn resolve_map<'a>(&self, root: &'a Map<String, Value>) -> Result<&'a Value, NotFound> {
        match &self.kind {
            PathKind::Tag(name) => root
                .get("Tags")
                .and_then(Value::as_array)
                .and_then(|tags| {
                    tags.iter()
                        .find(|t| t.get("Key").and_then(Value::as_str) == Some(name.as_str()))
                })
                .and_then(|t| t.get("Value"))
                .ok_or_else(|| self.not_found()),
            PathKind::Segments(segments) => {
                let (first, rest) = match segments.split_first() {
                    Some((PathSegment::Key(key), rest)) => (key, rest),
                    _ => return Err(self.not_found()),
                };
                let mut current = root.get(first).ok_or_else(|| self.not_found())?;
                for segment in rest {
                    current = match (segment, current) {
                        (PathSegment::Key(key), Value::Object(map)) => {
                            map.get(key).ok_or_else(|| self.not_found())?
                        }
                        (PathSegment::Index(idx), Value::Array(items)) => {
                            let len = items.len() as i64;
                            let pos = if *idx < 0 { len + idx } else { *idx };
                            if pos < 0 || pos >= len {
                                return Err(self.not_found());
                            }
                            &items[pos as usize]
                        }
                        _ => return Err(self.not_found()),
                    };
                }
                Ok(current)
            }
        }
    }

    fn not_found(&self) -> NotFound {
        NotFound {
            path: self.raw.clone(),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_segments(path: &str) -> Result<Vec<PathSegment>, String> {
    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut expect_segment = true;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                if expect_segment {
                    return Err(format!("empty segment at offset {i}"));
                }
                expect_segment = true;
                i += 1;
            }
            '[' => {
                let end = find_from(&chars, i + 1, ']').ok_or("unclosed '['")?;
                let inner: String = chars[i + 1..end].iter().collect();
                segments.push(parse_bracket(inner.trim())?);
                expect_segment = false;
                i = end + 1;
            }
            '"' => {
                if !expect_segment {
                    return Err(format!("unexpected quote at offset {i}"));
                }
                let end = find_from(&chars, i + 1, '"').ok_or("unclosed quote")?;
                segments.push(PathSegment::Key(chars[i + 1..end].iter().collect()));
                expect_segment = false;
                i = end + 1;
            }
            _ => {
                if !expect_segment {
                    return Err(format!("missing '.' before offset {i}"));
                }
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                segments.push(PathSegment::Key(chars[start..i].iter().collect()));
                expect_segment = false;
            }
        }
    }

    if expect_segment {
        return Err("path is empty or ends with '.'".to_string());
    }
    Ok(segments)
}

fn find_from(chars: &[char], start: usize, needle: char) -> Option<usize> {
    chars[start..]
        .iter()
        .position(|c| *c == needle)
        .map(|p| p + start)
}

fn parse_bracket(inner: &str) -> Result<PathSegment, String> {
    if inner.is_empty() {
        return Err("empty brackets".to_string());
    }
    for quote in ['"', '\''] {
        if inner.len() >= 2 && inner.starts_with(quote) && inner.ends_with(quote) {
            return Ok(PathSegment::Key(inner[1..inner.len() - 1].to_string()));
        }
    }
    match inner.parse::<i64>() {
        Ok(idx) => Ok(PathSegment::Index(idx)),
        Err(_) => Ok(PathSegment::Key(inner.to_string())),
    }
}

/// A snapshot of one cloud object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(Map<String, Value>);

impl Resource {
    /// Create an empty resource
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Convert a JSON value into a resource; only objects are accepted
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a top-level field
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Resolve a parsed key path
    pub fn resolve(&self, path: &KeyPath) -> Result<&Value, NotFound> {
        path.resolve_map(&self.0)
    }

    /// Parse and resolve a key expression; malformed paths resolve to absent
    pub fn lookup(&self, path: &str) -> Result<&Value, NotFound> {
        match KeyPath::parse(path) {
            Ok(parsed) => self.resolve(&parsed),
            Err(_) => Err(NotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Stable identifier stored in `field`, as a string
    pub fn id(&self, field: &str) -> Option<String> {
        match self.lookup(field).ok()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Annotation namespace map (`c7n:<namespace>`), if present
    pub fn annotation(&self, namespace: &str) -> Option<&Map<String, Value>> {
        self.0.get(&annotation_key(namespace)).and_then(Value::as_object)
    }

    /// Cached entry in an annotation namespace
    pub fn annotation_entry(&self, namespace: &str, key: &str) -> Option<&Value> {
        self.annotation(namespace).and_then(|m| m.get(key))
    }

    /// Store an entry in an annotation namespace, creating it if needed
    pub fn annotate(&mut self, namespace: &str, key: impl Into<String>, value: Value) {
        let slot = self
            .0
            .entry(annotation_key(namespace))
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(map) = slot {
            map.insert(key.into(), value);
        }
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Resource {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        resource.into_value()
    }
}
