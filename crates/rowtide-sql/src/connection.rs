use std::future::Future;

use rowtide_core::placeholders::{self, Placeholder};
use rowtide_core::{RowMap, Value};

use crate::error::{DbError, DbResult};

/// Parameters for a single statement execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    /// Bound to `:name` markers.
    Named(Vec<(String, Value)>),
    /// Bound to `?` markers in order.
    Positional(Vec<Value>),
}

impl Params {
    pub fn named<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Params::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Named(p) => p.is_empty(),
            Params::Positional(p) => p.is_empty(),
        }
    }
}

/// Rewrite markers to a driver's numbered syntax and return the values in
/// bind order. Named params rewrite only `:name` markers, so a `?` operator
/// in the statement is left alone. Positional params rewrite `?` markers. A
/// named marker used twice binds one value.
pub(crate) fn bind_numbered(
    sql: &str,
    params: &Params,
    marker: impl Fn(usize) -> String,
) -> DbResult<(String, Vec<Value>)> {
    if let Params::None = params {
        return Ok((sql.to_string(), Vec::new()));
    }

    let mut values: Vec<Value> = Vec::new();
    let mut named_slots: Vec<(String, usize)> = Vec::new();
    let positional_values: &[Value] = match params {
        Params::Positional(p) => p,
        _ => &[],
    };
    let mut positional = positional_values.iter();

    let rewritten = placeholders::rewrite::<DbError>(sql, |placeholder| match placeholder {
        Placeholder::Positional => {
            if let Params::Named(_) = params {
                return Ok("?".to_string());
            }
            let value = positional.next().ok_or_else(|| {
                DbError::Query(format!(
                    "statement has more '?' placeholders than the {} values given",
                    values.len()
                ))
            })?;
            values.push(value.clone());
            Ok(marker(values.len()))
        }
        Placeholder::Named(name) => {
            if let Some((_, slot)) = named_slots.iter().find(|(n, _)| n == name) {
                return Ok(marker(*slot));
            }
            let value = match params {
                Params::Named(p) => p.iter().find(|(n, _)| n == name).map(|(_, v)| v),
                _ => None,
            }
            .ok_or_else(|| DbError::Query(format!("no value given for parameter :{}", name)))?;
            values.push(value.clone());
            named_slots.push((name.clone(), values.len()));
            Ok(marker(values.len()))
        }
    })?;

    Ok((rewritten, values))
}

/// An open database session.
///
/// Rows are returned with normalized column names and temporal values
/// converted to UTC instants.
pub trait Connection: Send + Sync {
    /// Run a statement and collect its rows.
    fn query(
        &self,
        sql: &str,
        params: &Params,
    ) -> impl Future<Output = DbResult<Vec<RowMap>>> + Send;

    /// Run a statement that returns no rows.
    fn execute(&self, sql: &str, params: &Params) -> impl Future<Output = DbResult<u64>> + Send;

    /// Prepare a named statement with positional `?` markers on this session.
    fn prepare(&self, name: &str, sql: &str) -> impl Future<Output = DbResult<()>> + Send;

    /// Check whether a named statement exists on this session.
    fn is_prepared(&self, name: &str) -> bool;

    /// Execute a statement previously prepared on this session.
    fn query_prepared(
        &self,
        name: &str,
        values: &[Value],
    ) -> impl Future<Output = DbResult<Vec<RowMap>>> + Send;

    /// Check the session is still usable.
    fn is_valid(&self) -> impl Future<Output = bool> + Send;
}

/// Opens sessions for a configured database.
pub trait Connector: Send + Sync {
    type Conn: Connection;

    fn connect(&self) -> impl Future<Output = DbResult<Self::Conn>> + Send;

    /// Short description for log messages.
    fn describe(&self) -> String;
}

/// Apply column-name folding to a result column.
pub(crate) fn column_key(name: &str, lowercase: bool) -> String {
    if lowercase {
        name.to_lowercase()
    } else {
        name.to_string()
    }
}
