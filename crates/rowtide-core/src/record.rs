//! The record enriched by lookups or emitted by the incremental input.
//!
//! Records are string-keyed maps. Fields are addressed either by a bare
//! name (`ip`) or by a bracketed path (`[server][ip]`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{RowMap, Value};

const TAGS_FIELD: &str = "tags";

/// A parsed field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    path: Vec<String>,
}

impl FieldRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::InvalidFieldReference(reference.to_string()));
        }

        if !reference.starts_with('[') {
            return Ok(Self {
                path: vec![reference.to_string()],
            });
        }

        let mut path = Vec::new();
        let mut rest = reference;
        while !rest.is_empty() {
            let inner = rest
                .strip_prefix('[')
                .ok_or_else(|| Error::InvalidFieldReference(reference.to_string()))?;
            let end = inner
                .find(']')
                .ok_or_else(|| Error::InvalidFieldReference(reference.to_string()))?;
            let segment = &inner[..end];
            if segment.is_empty() {
                return Err(Error::InvalidFieldReference(reference.to_string()));
            }
            path.push(segment.to_string());
            rest = &inner[end + 1..];
        }

        Ok(Self { path })
    }

    pub fn segments(&self) -> &[String] {
        &self.path
    }
}

/// A host record: an associative map with tag and template support.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record whose top-level fields are the row's columns.
    pub fn from_row(row: RowMap) -> Self {
        Self { fields: row }
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> HashMap<String, Value> {
        self.fields
    }

    /// Get a field by reference. Returns `None` when any segment is absent.
    pub fn get(&self, reference: &str) -> Option<&Value> {
        let field = FieldRef::parse(reference).ok()?;
        let (first, rest) = field.path.split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set a field by reference, creating intermediate objects as needed.
    pub fn set(&mut self, reference: &str, value: Value) -> Result<()> {
        let field = FieldRef::parse(reference)?;
        let (last, parents) = field
            .path
            .split_last()
            .ok_or_else(|| Error::InvalidFieldReference(reference.to_string()))?;

        let mut map = &mut self.fields;
        for segment in parents {
            let entry = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(HashMap::new()));
            if !matches!(entry, Value::Object(_)) {
                *entry = Value::Object(HashMap::new());
            }
            let Value::Object(inner) = entry else {
                return Err(Error::InvalidFieldReference(reference.to_string()));
            };
            map = inner;
        }
        map.insert(last.clone(), value);
        Ok(())
    }

    /// Append a tag unless it is already present.
    pub fn tag(&mut self, tag: &str) {
        let tags = self
            .fields
            .entry(TAGS_FIELD.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));

        if let Value::String(single) = tags {
            *tags = Value::Array(vec![Value::String(std::mem::take(single))]);
        }

        if let Value::Array(items) = tags {
            if !items.iter().any(|t| t.as_str() == Some(tag)) {
                items.push(Value::String(tag.to_string()));
            }
        }
    }

    pub fn tags(&self) -> Vec<&str> {
        match self.fields.get(TAGS_FIELD) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) => vec![s.as_str()],
            _ => vec![],
        }
    }

    /// Interpolate `%{field}` references. References to absent fields are
    /// left in place verbatim.
    pub fn sprintf(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("%{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let reference = &after[..end];
                    match self.get(reference) {
                        Some(value) => out.push_str(&value.to_display_string()),
                        None => {
                            out.push_str("%{");
                            out.push_str(reference);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// True when the string contains a `%{...}` interpolation.
pub fn is_template(s: &str) -> bool {
    s.find("%{")
        .map(|start| s[start + 2..].contains('}'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut record = Record::new();
        record.set("message", Value::from("some text")).unwrap();
        record.set("ip", Value::from("10.3.1.1")).unwrap();
        record.set("[host][name]", Value::from("web-1")).unwrap();
        record
    }

    #[test]
    fn test_field_ref_parse() {
        assert_eq!(FieldRef::parse("ip").unwrap().segments(), ["ip"]);
        assert_eq!(FieldRef::parse("[a][b]").unwrap().segments(), ["a", "b"]);
        assert!(FieldRef::parse("[a").is_err());
        assert!(FieldRef::parse("").is_err());
    }

    #[test]
    fn test_get_nested() {
        let record = sample();
        assert_eq!(record.get("ip"), Some(&Value::from("10.3.1.1")));
        assert_eq!(record.get("[ip]"), Some(&Value::from("10.3.1.1")));
        assert_eq!(record.get("[host][name]"), Some(&Value::from("web-1")));
        assert_eq!(record.get("[host][missing]"), None);
        assert_eq!(record.get("[ip][deeper]"), None);
    }

    #[test]
    fn test_sprintf() {
        let record = sample();
        assert_eq!(record.sprintf("%%{[ip]}"), "%10.3.1.1");
        assert_eq!(record.sprintf("host=%{[host][name]}"), "host=web-1");
        assert_eq!(record.sprintf("%{nope}"), "%{nope}");
        assert_eq!(record.sprintf("no template"), "no template");
    }

    #[test]
    fn test_tags_are_deduplicated() {
        let mut record = Record::new();
        record.tag("_lookupfailure");
        record.tag("_lookupfailure");
        record.tag("_defaultsused");
        assert_eq!(record.tags(), vec!["_lookupfailure", "_defaultsused"]);
    }

    #[test]
    fn test_is_template() {
        assert!(is_template("%{[ip]}"));
        assert!(!is_template("ip"));
        assert!(!is_template("%{unterminated"));
    }
}
