//! `$`-rooted references into the data document: `$`, `$.a.b`,
//! `$.items[0].name`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed path reference. Parsing happens once, when the graph
/// definition is deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    raw: String,
    segments: Vec<Segment>,
}

impl Path {
    /// The whole document.
    pub fn root() -> Self {
        Self { raw: "$".into(), segments: Vec::new() }
    }

    pub fn parse(raw: &str) -> Result<Self, ExpressionError> {
        let malformed = |reason: &str| ExpressionError::Malformed {
            path: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let rest = raw.strip_prefix('$').ok_or_else(|| malformed("must start with '$'"))?;
        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut key = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        if next == ']' {
                            return Err(malformed("unexpected ']'"));
                        }
                        key.push(next);
                        chars.next();
                    }
                    if key.is_empty() {
                        return Err(malformed("empty key segment"));
                    }
                    segments.push(Segment::Key(key));
                }
                '[' => {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            Some(_) => return Err(malformed("index must be a non-negative integer")),
                            None => return Err(malformed("unterminated '['")),
                        }
                    }
                    let index = digits
                        .parse::<usize>()
                        .map_err(|_| malformed("index must be a non-negative integer"))?;
                    segments.push(Segment::Index(index));
                }
                _ => return Err(malformed("expected '.' or '[' after a segment")),
            }
        }

        Ok(Self { raw: raw.to_owned(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Follow the path through `doc`. `None` if any segment is absent.
    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(doc, |current, segment| match segment {
            Segment::Key(key) => current.as_object()?.get(key),
            Segment::Index(index) => current.as_array()?.get(*index),
        })
    }

    /// Like [`resolve`](Self::resolve) but reports the missing path.
    pub fn select<'a>(&self, doc: &'a Value) -> Result<&'a Value, ExpressionError> {
        self.resolve(doc)
            .ok_or_else(|| ExpressionError::NotFound { path: self.raw.clone() })
    }

    /// Write `value` at this path. The root path replaces the document;
    /// missing intermediate keys are created as objects (a `null`
    /// intermediate counts as missing). Array indices must already exist.
    pub fn write(&self, doc: &mut Value, value: Value) -> Result<(), ExpressionError> {
        let not_writable = |reason: String| ExpressionError::NotWritable {
            path: self.raw.clone(),
            reason,
        };

        let Some((last, parents)) = self.segments.split_last() else {
            *doc = value;
            return Ok(());
        };

        let mut current = doc;
        for segment in parents {
            current = match segment {
                Segment::Key(key) => {
                    if current.is_null() {
                        *current = Value::Object(Map::new());
                    }
                    let object = current
                        .as_object_mut()
                        .ok_or_else(|| not_writable(format!("'{key}' has a non-object parent")))?;
                    object.entry(key.clone()).or_insert(Value::Null)
                }
                Segment::Index(index) => current
                    .as_array_mut()
                    .and_then(|items| items.get_mut(*index))
                    .ok_or_else(|| not_writable(format!("index {index} does not exist")))?,
            };
        }

        match last {
            Segment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                current
                    .as_object_mut()
                    .ok_or_else(|| not_writable(format!("'{key}' has a non-object parent")))?
                    .insert(key.clone(), value);
            }
            Segment::Index(index) => {
                let slot = current
                    .as_array_mut()
                    .and_then(|items| items.get_mut(*index))
                    .ok_or_else(|| not_writable(format!("index {index} does not exist")))?;
                *slot = value;
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = ExpressionError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.raw
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Shallow, last-write-wins merge of an object `value` into `doc`.
pub fn merge_into(doc: &mut Value, value: Value) -> Result<(), ExpressionError> {
    let Value::Object(incoming) = value else {
        return Err(ExpressionError::NotWritable {
            path: "$".into(),
            reason: "only object results can be merged without a result_path".into(),
        });
    };

    if doc.is_null() {
        *doc = Value::Object(Map::new());
    }
    let target = doc.as_object_mut().ok_or_else(|| ExpressionError::NotWritable {
        path: "$".into(),
        reason: "data document is not an object".into(),
    })?;
    target.extend(incoming);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> Path {
        raw.parse().expect("valid path")
    }

    #[test]
    fn resolves_keys_and_indices() {
        let doc = json!({ "call": { "legs": [{ "id": "a" }, { "id": "b" }] } });
        assert_eq!(path("$.call.legs[1].id").resolve(&doc), Some(&json!("b")));
        assert_eq!(path("$").resolve(&doc), Some(&doc));
        assert_eq!(path("$.call.legs[5]").resolve(&doc), None);
        assert_eq!(path("$.call.missing").resolve(&doc), None);
        assert_eq!(path("$.call.legs.id").resolve(&doc), None);
    }

    #[test]
    fn select_reports_missing_path() {
        let err = path("$.connection_type").select(&json!({})).unwrap_err();
        assert_eq!(err, ExpressionError::NotFound { path: "$.connection_type".into() });
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for raw in ["", "connection_type", "$.", "$..a", "$[x]", "$[1", "$a", "$.a]"] {
            assert!(
                matches!(Path::parse(raw), Err(ExpressionError::Malformed { .. })),
                "{raw:?} should be malformed"
            );
        }
    }

    #[test]
    fn write_creates_intermediate_objects() {
        let mut doc = json!({ "keep": 1 });
        path("$.voicemail.result.status").write(&mut doc, json!("detected")).unwrap();
        assert_eq!(
            doc,
            json!({ "keep": 1, "voicemail": { "result": { "status": "detected" } } })
        );
    }

    #[test]
    fn write_at_root_replaces_document() {
        let mut doc = json!({ "old": true });
        Path::root().write(&mut doc, json!([1, 2])).unwrap();
        assert_eq!(doc, json!([1, 2]));
    }

    #[test]
    fn write_through_scalar_fails() {
        let mut doc = json!({ "a": 5 });
        let err = path("$.a.b").write(&mut doc, json!(1)).unwrap_err();
        assert!(matches!(err, ExpressionError::NotWritable { .. }));
    }

    #[test]
    fn write_into_existing_array_slot() {
        let mut doc = json!({ "folios": [1, 2, 3] });
        path("$.folios[1]").write(&mut doc, json!("x")).unwrap();
        assert_eq!(doc["folios"], json!([1, "x", 3]));
        assert!(path("$.folios[3]").write(&mut doc, json!(4)).is_err());
    }

    #[test]
    fn merge_is_last_write_wins() {
        let mut doc = json!({ "a": 1, "b": 2 });
        merge_into(&mut doc, json!({ "b": 3, "c": 4 })).unwrap();
        assert_eq!(doc, json!({ "a": 1, "b": 3, "c": 4 }));
        assert!(merge_into(&mut doc, json!("scalar")).is_err());
    }

    #[test]
    fn serde_uses_the_raw_string() {
        let p: Path = serde_json::from_value(json!("$.a[0]")).unwrap();
        assert_eq!(serde_json::to_value(&p).unwrap(), json!("$.a[0]"));
        assert!(serde_json::from_value::<Path>(json!("a.b")).is_err());
    }
}
