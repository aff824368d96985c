use crate::types::Value;

/// Named parameter bound to the current checkpoint value.
pub const LAST_VALUE_PARAM: &str = "sql_last_value";

/// Bind-value sentinel meaning "substitute the checkpoint on every call".
pub const LAST_VALUE_SENTINEL: &str = ":sql_last_value";

/// How paging is applied to the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingMode {
    /// Wrap the statement in `LIMIT`/`OFFSET` pages.
    #[default]
    Auto,
    /// The statement carries its own `:offset` and `:size` markers.
    Explicit,
}

/// Paging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub mode: PagingMode,
    pub page_size: usize,
}

/// A value bound to a prepared statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Literal(Value),
    LastValue,
}

impl BindValue {
    /// Interpret a configured bind value, recognizing the checkpoint sentinel.
    pub fn from_config(value: Value) -> Self {
        match &value {
            Value::String(s) if s == LAST_VALUE_SENTINEL => BindValue::LastValue,
            _ => BindValue::Literal(value),
        }
    }

    pub fn resolve(&self, last_value: &Value) -> Value {
        match self {
            BindValue::Literal(v) => v.clone(),
            BindValue::LastValue => last_value.clone(),
        }
    }
}

/// A named server-side prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSpec {
    pub name: String,
    pub bind_values: Vec<BindValue>,
}

/// The statement an incremental input runs on each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementSpec {
    pub sql: String,
    /// Named parameters bound alongside `sql_last_value`.
    pub parameters: Vec<(String, Value)>,
    pub paging: Option<Paging>,
    pub prepared: Option<PreparedSpec>,
}

impl StatementSpec {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
            paging: None,
            prepared: None,
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn paged(mut self, mode: PagingMode, page_size: usize) -> Self {
        self.paging = Some(Paging { mode, page_size });
        self
    }

    pub fn prepared(mut self, name: impl Into<String>, bind_values: Vec<BindValue>) -> Self {
        self.prepared = Some(PreparedSpec {
            name: name.into(),
            bind_values,
        });
        self
    }

    /// Named parameters plus the checkpoint under `sql_last_value`.
    pub fn bound_parameters(&self, last_value: &Value) -> Vec<(String, Value)> {
        let mut params = self.parameters.clone();
        params.retain(|(name, _)| name != LAST_VALUE_PARAM);
        params.push((LAST_VALUE_PARAM.to_string(), last_value.clone()));
        params
    }
}
