//! SQLite backend over rusqlite.
//!
//! Used both as a remote source and as the local snapshot database. The
//! session sits behind a mutex, so callers on the same connection are
//! serialized.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::params_from_iter;
use tracing::{debug, info};

use rowtide_core::snapshot::quote_ident;
use rowtide_core::{
    parse_timestamp, ConnectionOptions, ConnectionSettings, RowMap, TimezoneSpec, Value,
};

use crate::connection::{bind_numbered, column_key, Connection, Connector, Params};
use crate::error::{DbError, DbResult};

const MEMORY: &str = ":memory:";

fn question(n: usize) -> String {
    format!("?{}", n)
}

/// Opens SQLite databases, in memory or from a file path.
pub struct SqliteConnector {
    location: String,
    options: ConnectionOptions,
}

impl SqliteConnector {
    pub fn new(settings: &ConnectionSettings, options: ConnectionOptions) -> Self {
        Self {
            location: database_location(&settings.connection_string),
            options,
        }
    }

    pub fn memory(options: ConnectionOptions) -> Self {
        Self {
            location: MEMORY.to_string(),
            options,
        }
    }

    pub fn file(path: impl Into<String>, options: ConnectionOptions) -> Self {
        Self {
            location: path.into(),
            options,
        }
    }

    /// Open a session without going through the async connector.
    pub fn open(&self) -> DbResult<SqliteConnection> {
        let conn = if self.location == MEMORY {
            rusqlite::Connection::open_in_memory()?
        } else {
            info!(path = %self.location, "Opening SQLite database");
            rusqlite::Connection::open(&self.location)?
        };
        conn.busy_timeout(self.options.pool_timeout)?;
        Ok(SqliteConnection {
            conn: Mutex::new(conn),
            options: self.options.clone(),
            prepared: Mutex::new(HashMap::new()),
        })
    }
}

impl Connector for SqliteConnector {
    type Conn = SqliteConnection;

    async fn connect(&self) -> DbResult<SqliteConnection> {
        self.open()
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }
}

/// Accepts `jdbc:sqlite:<path>`, `sqlite://<path>`, `sqlite:<path>` or a bare
/// path. An empty location is an in-memory database.
fn database_location(connection_string: &str) -> String {
    let s = connection_string.trim();
    let s = s.strip_prefix("jdbc:").unwrap_or(s);
    let s = s.strip_prefix("sqlite:").unwrap_or(s);
    let s = s.strip_prefix("//").unwrap_or(s);
    if s.is_empty() {
        MEMORY.to_string()
    } else {
        s.to_string()
    }
}

pub struct SqliteConnection {
    conn: Mutex<rusqlite::Connection>,
    options: ConnectionOptions,
    /// Name to statement text. rusqlite caches the compiled statement.
    prepared: Mutex<HashMap<String, String>>,
}

impl SqliteConnection {
    fn lock(&self) -> DbResult<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| DbError::Connection("sqlite session lock poisoned".into()))
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn query_sync(&self, sql: &str, params: &Params) -> DbResult<Vec<RowMap>> {
        let conn = self.lock()?;
        run_query(&conn, sql, params, &self.options)
    }

    pub fn execute_sync(&self, sql: &str, params: &Params) -> DbResult<u64> {
        let conn = self.lock()?;
        run_execute(&conn, sql, params, &self.options)
    }

    /// Run several `;`-separated statements.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run `f` inside one transaction. The transaction rolls back if `f`
    /// fails.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl Connection for SqliteConnection {
    async fn query(&self, sql: &str, params: &Params) -> DbResult<Vec<RowMap>> {
        self.query_sync(sql, params)
    }

    async fn execute(&self, sql: &str, params: &Params) -> DbResult<u64> {
        self.execute_sync(sql, params)
    }

    async fn prepare(&self, name: &str, sql: &str) -> DbResult<()> {
        {
            let conn = self.lock()?;
            conn.prepare_cached(sql).map_err(|e| match DbError::from(e) {
                DbError::Connection(message) => DbError::Connection(message),
                other => DbError::Prepare {
                    name: name.to_string(),
                    message: other.to_string(),
                },
            })?;
        }
        debug!(statement = name, "Prepared statement");
        self.prepared
            .lock()
            .map_err(|_| DbError::Connection("sqlite session lock poisoned".into()))?
            .insert(name.to_string(), sql.to_string());
        Ok(())
    }

    fn is_prepared(&self, name: &str) -> bool {
        self.prepared
            .lock()
            .map(|p| p.contains_key(name))
            .unwrap_or(false)
    }

    async fn query_prepared(&self, name: &str, values: &[Value]) -> DbResult<Vec<RowMap>> {
        let sql = self
            .prepared
            .lock()
            .map_err(|_| DbError::Connection("sqlite session lock poisoned".into()))?
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::Prepare {
                name: name.to_string(),
                message: "not prepared on this connection".into(),
            })?;

        let conn = self.lock()?;
        let bound: Vec<SqlValue> = values
            .iter()
            .map(|v| to_sql_value(v, self.options.timezone))
            .collect();
        let mut stmt = conn.prepare_cached(&sql)?;
        collect_rows(&mut stmt, &bound, &self.options)
    }

    async fn is_valid(&self) -> bool {
        match self.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => false,
        }
    }
}

/// Run a query on a borrowed session, for use inside [`SqliteConnection::transaction`].
pub fn run_query(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
    options: &ConnectionOptions,
) -> DbResult<Vec<RowMap>> {
    let (sql, values) = bind_numbered(sql, params, question)?;
    let bound: Vec<SqlValue> = values
        .iter()
        .map(|v| to_sql_value(v, options.timezone))
        .collect();
    let mut stmt = conn.prepare(&sql)?;
    collect_rows(&mut stmt, &bound, options)
}

pub fn run_execute(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &Params,
    options: &ConnectionOptions,
) -> DbResult<u64> {
    let (sql, values) = bind_numbered(sql, params, question)?;
    let bound: Vec<SqlValue> = values
        .iter()
        .map(|v| to_sql_value(v, options.timezone))
        .collect();
    let changed = conn.execute(&sql, params_from_iter(bound.iter()))?;
    Ok(changed as u64)
}

/// Insert rows into `table`, taking `columns` from each row. Missing
/// columns are inserted as NULL.
pub fn insert_rows(
    conn: &rusqlite::Connection,
    table: &str,
    columns: &[String],
    rows: &[RowMap],
    timezone: Option<TimezoneSpec>,
) -> DbResult<usize> {
    if columns.is_empty() {
        return Ok(0);
    }
    let markers: Vec<String> = (1..=columns.len()).map(question).collect();
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        quoted.join(", "),
        markers.join(", ")
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    for row in rows {
        let values: Vec<SqlValue> = columns
            .iter()
            .map(|c| row.get(c).map_or(SqlValue::Null, |v| to_sql_value(v, timezone)))
            .collect();
        stmt.execute(params_from_iter(values.iter()))?;
    }
    Ok(rows.len())
}

/// Timestamps are stored as wall-clock text in the configured zone.
pub fn to_sql_value(value: &Value, timezone: Option<TimezoneSpec>) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Decimal(d) => SqlValue::Text(d.to_string()),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(ts) => {
            let local = match timezone {
                Some(tz) => tz.to_local(*ts),
                None => ts.naive_utc(),
            };
            SqlValue::Text(local.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }
        Value::Array(_) | Value::Object(_) => {
            let json: serde_json::Value = value.clone().into();
            SqlValue::Text(json.to_string())
        }
    }
}

fn collect_rows(
    stmt: &mut rusqlite::Statement<'_>,
    values: &[SqlValue],
    options: &ConnectionOptions,
) -> DbResult<Vec<RowMap>> {
    let names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|n| column_key(n, options.lowercase_column_names))
        .collect();
    let decls: Vec<Option<String>> = stmt
        .columns()
        .iter()
        .map(|c| c.decl_type().map(|d| d.to_ascii_uppercase()))
        .collect();

    let mut rows = stmt.query(params_from_iter(values.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = RowMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            let value = column_value(
                row.get_ref(index)?,
                decls[index].as_deref(),
                options.timezone,
            )?;
            map.insert(name.clone(), value);
        }
        out.push(map);
    }
    Ok(out)
}

fn column_value(
    raw: ValueRef<'_>,
    decl: Option<&str>,
    timezone: Option<TimezoneSpec>,
) -> DbResult<Value> {
    let decl = decl.unwrap_or("");
    let temporal = decl.contains("DATE") || decl.contains("TIME");
    Ok(match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if decl.starts_with("BOOL") => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if temporal {
                match temporal_value(&text, timezone)? {
                    Some(ts) => ts,
                    None => Value::String(text),
                }
            } else {
                Value::String(text)
            }
        }
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    })
}

/// Zone-less text is wall-clock time in the configured zone; text with an
/// offset is already an instant.
fn temporal_value(text: &str, timezone: Option<TimezoneSpec>) -> DbResult<Option<Value>> {
    let trimmed = text.trim();
    let naive = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        });

    match naive {
        Some(local) => {
            let instant = match timezone {
                Some(tz) => tz.to_utc(local)?,
                None => local.and_utc(),
            };
            Ok(Some(Value::Timestamp(instant)))
        }
        None => Ok(parse_timestamp(trimmed).map(Value::Timestamp)),
    }
}
