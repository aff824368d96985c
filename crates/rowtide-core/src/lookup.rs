use std::collections::HashMap;

use crate::record::{is_template, Record};
use crate::types::Value;

/// Where a lookup parameter value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamBinding {
    Literal(Value),
    /// A field reference such as `ip` or `[host][ip]`.
    Field(String),
    /// A `%{field}` interpolation template.
    Template(String),
}

impl ParamBinding {
    /// Strings become templates when they interpolate a field, and field
    /// references otherwise. Anything else is a literal.
    pub fn from_config(value: Value) -> Self {
        match value {
            Value::String(s) if is_template(&s) => ParamBinding::Template(s),
            Value::String(s) => ParamBinding::Field(s),
            other => ParamBinding::Literal(other),
        }
    }

    /// Resolve against a record. `None` means the binding could not be
    /// resolved: the template interpolated nothing, or the field is absent
    /// or composite.
    pub fn resolve(&self, record: &Record) -> Option<Value> {
        match self {
            ParamBinding::Literal(v) => Some(v.clone()),
            ParamBinding::Template(template) => {
                let formatted = record.sprintf(template);
                (formatted != *template).then_some(Value::String(formatted))
            }
            ParamBinding::Field(reference) => match record.get(reference) {
                Some(v) if v.is_null() || v.is_composite() => None,
                Some(v) => Some(v.clone()),
                None => None,
            },
        }
    }

    /// The configured text, for log messages.
    pub fn describe(&self) -> String {
        match self {
            ParamBinding::Literal(v) => v.to_display_string(),
            ParamBinding::Field(s) | ParamBinding::Template(s) => s.clone(),
        }
    }
}

/// Parameter bindings for a lookup statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LookupParams {
    #[default]
    None,
    /// Bound to `:name` markers.
    Named(Vec<(String, ParamBinding)>),
    /// Bound to `?` markers in order.
    Positional(Vec<ParamBinding>),
}

impl LookupParams {
    pub fn is_empty(&self) -> bool {
        match self {
            LookupParams::None => true,
            LookupParams::Named(p) => p.is_empty(),
            LookupParams::Positional(p) => p.is_empty(),
        }
    }
}

/// An enrichment query and how its result is attached to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupDef {
    pub id: String,
    pub query: String,
    pub parameters: LookupParams,
    /// Field that receives the result rows.
    pub target: String,
    /// Row used when the query returns nothing.
    pub default_hash: Option<HashMap<String, Value>>,
    pub tag_on_failure: Vec<String>,
    pub tag_on_default_use: Vec<String>,
}

impl LookupDef {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            target: id.clone(),
            id,
            query: query.into(),
            parameters: LookupParams::None,
            default_hash: None,
            tag_on_failure: Vec::new(),
            tag_on_default_use: Vec::new(),
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn parameters(mut self, parameters: LookupParams) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn default_hash(mut self, default_hash: HashMap<String, Value>) -> Self {
        self.default_hash = (!default_hash.is_empty()).then_some(default_hash);
        self
    }

    pub fn tags(mut self, on_failure: Vec<String>, on_default_use: Vec<String>) -> Self {
        self.tag_on_failure = on_failure;
        self.tag_on_default_use = on_default_use;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let mut r = Record::new();
        r.set("ip", Value::from("10.3.1.1")).unwrap();
        r.set("[host][tags]", Value::Array(vec![])).unwrap();
        r
    }

    #[test]
    fn test_from_config() {
        assert_eq!(
            ParamBinding::from_config(Value::from("%{[ip]}")),
            ParamBinding::Template("%{[ip]}".into())
        );
        assert_eq!(
            ParamBinding::from_config(Value::from("ip")),
            ParamBinding::Field("ip".into())
        );
        assert_eq!(
            ParamBinding::from_config(Value::Int(1)),
            ParamBinding::Literal(Value::Int(1))
        );
    }

    #[test]
    fn test_resolve() {
        let r = record();
        assert_eq!(
            ParamBinding::Field("ip".into()).resolve(&r),
            Some(Value::from("10.3.1.1"))
        );
        assert_eq!(ParamBinding::Field("missing".into()).resolve(&r), None);
        assert_eq!(ParamBinding::Field("host".into()).resolve(&r), None);
        assert_eq!(
            ParamBinding::Template("%%{[ip]}".into()).resolve(&r),
            Some(Value::from("%10.3.1.1"))
        );
        assert_eq!(ParamBinding::Template("%{nope}".into()).resolve(&r), None);
    }

    #[test]
    fn test_target_defaults_to_id() {
        let def = LookupDef::new("lookup-1", "SELECT 1");
        assert_eq!(def.target, "lookup-1");
    }
}
