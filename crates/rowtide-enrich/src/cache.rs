//! Local snapshot database.
//!
//! Lookups read from tables that loaders refresh on a schedule. A refresh
//! fills the staging table and swaps it with the live one inside a single
//! transaction, under the write half of the cache lock. Readers therefore
//! see either the previous table or the new one.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rowtide_core::snapshot::quote_ident;
use rowtide_core::{Column, ConnectionOptions, DbObject, LoaderDef, RowMap, Value};
use rowtide_sql::sqlite::{insert_rows, run_execute, run_query};
use rowtide_sql::{Connector, DbError, DbResult, Params, SqliteConnection, SqliteConnector};

use crate::error::{EnrichError, EnrichResult};
use crate::loader::RemoteLoader;

pub struct SnapshotCache {
    db: RwLock<SqliteConnection>,
    path: Option<PathBuf>,
}

impl SnapshotCache {
    pub fn in_memory() -> EnrichResult<Self> {
        let db = SqliteConnector::memory(ConnectionOptions::default()).open()?;
        Ok(Self {
            db: RwLock::new(db),
            path: None,
        })
    }

    /// Open a cache, file-backed under `staging_directory` when one is given.
    pub fn open(staging_directory: Option<&Path>) -> EnrichResult<Self> {
        let Some(dir) = staging_directory else {
            return Self::in_memory();
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("rowtide_snapshot_{}.db", Uuid::new_v4().simple()));
        let db = SqliteConnector::file(path.to_string_lossy(), ConnectionOptions::default())
            .open()?;
        Ok(Self {
            db: RwLock::new(db),
            path: Some(path),
        })
    }

    /// The database file, when the cache is file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a lookup query. Concurrent readers share the lock.
    pub async fn fetch(&self, sql: &str, params: &Params) -> DbResult<Vec<RowMap>> {
        let db = self.db.read().await;
        db.query_sync(sql, params)
    }

    /// Run a write statement against the local database.
    pub async fn execute(&self, sql: &str, params: &Params) -> DbResult<u64> {
        let db = self.db.write().await;
        db.execute_sync(sql, params)
    }

    /// Create a table and its index. Unless the object preserves existing
    /// data, any table of the same name is dropped first.
    pub async fn build_db_object(&self, object: &DbObject) -> EnrichResult<()> {
        let db = self.db.write().await;
        let options = db.options().clone();
        let result = db.transaction(|tx| {
            if !object.preserve_existing {
                let drop = format!("DROP TABLE IF EXISTS {}", quote_ident(&object.name));
                run_execute(tx, &drop, &Params::None, &options)?;
            }
            run_execute(tx, &object.create_table_sql(), &Params::None, &options)?;
            if let Some(index) = object.create_index_sql() {
                run_execute(tx, &index, &Params::None, &options)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                debug!(table = %object.name, "Built local table");
                Ok(())
            }
            Err(e) if e.is_connection_error() => {
                warn!(
                    table = %object.name,
                    error = %e,
                    "Local database unavailable, table not built"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh one table from its loader.
    ///
    /// A loader that returns no rows leaves the current table in place. An
    /// unreachable remote is logged and skipped until the next refresh.
    pub async fn fill_and_switch<K: Connector>(
        &self,
        loader: &RemoteLoader<K>,
    ) -> EnrichResult<()> {
        let def = loader.def();
        let rows = match loader.fetch().await {
            Ok(rows) => rows,
            Err(e) if e.is_connection_error() => {
                warn!(
                    loader = %def.id,
                    error = %e,
                    "Remote unavailable, keeping current snapshot"
                );
                return Ok(());
            }
            Err(e) => {
                error!(loader = %def.id, error = %e, "Loader query failed");
                return Err(EnrichError::Loader {
                    loader: def.id.clone(),
                    message: e.to_string(),
                });
            }
        };

        if rows.is_empty() {
            info!(
                loader = %def.id,
                table = %def.local_table,
                "Loader returned no rows, keeping current snapshot"
            );
            return Ok(());
        }

        let db = self.db.write().await;
        let options = db.options().clone();
        match db.transaction(|tx| switch_in(tx, def, &rows, &options)) {
            Ok(count) => {
                info!(
                    loader = %def.id,
                    table = %def.local_table,
                    rows = count,
                    "Snapshot table refreshed"
                );
                Ok(())
            }
            Err(e) if e.is_connection_error() => {
                warn!(
                    loader = %def.id,
                    error = %e,
                    "Local database unavailable, refresh skipped"
                );
                Ok(())
            }
            Err(e) => {
                error!(loader = %def.id, error = %e, "Snapshot refresh failed");
                Err(EnrichError::Loader {
                    loader: def.id.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    pub async fn populate_all<K: Connector>(
        &self,
        loaders: &[RemoteLoader<K>],
    ) -> EnrichResult<()> {
        for loader in loaders {
            self.fill_and_switch(loader).await?;
        }
        Ok(())
    }

    pub async fn repopulate_all<K: Connector>(
        &self,
        loaders: &[RemoteLoader<K>],
    ) -> EnrichResult<()> {
        for loader in loaders {
            self.fill_and_switch(loader).await?;
        }
        Ok(())
    }
}

impl Drop for SnapshotCache {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(path = %path.display(), error = %e, "Could not remove snapshot file");
            }
        }
    }
}

/// Load `rows` into the staging table and swap it with the live table.
fn switch_in(
    tx: &rusqlite::Connection,
    def: &LoaderDef,
    rows: &[RowMap],
    options: &ConnectionOptions,
) -> DbResult<usize> {
    let live = def.local_table.as_str();
    let staging = def.staging_table();

    let live_object = match table_columns(tx, live, options)? {
        Some(columns) => DbObject::new(live, columns),
        None => {
            let object = DbObject::new(live, infer_columns(rows)).preserve_existing(true);
            run_execute(tx, &object.create_table_sql(), &Params::None, options)?;
            object
        }
    };
    let staging_object = DbObject::new(staging.clone(), live_object.columns.clone())
        .preserve_existing(true);
    run_execute(tx, &staging_object.create_table_sql(), &Params::None, options)?;
    run_execute(
        tx,
        &format!("DELETE FROM {}", quote_ident(&staging)),
        &Params::None,
        options,
    )?;

    let columns: Vec<String> = live_object.columns.iter().map(|c| c.name.clone()).collect();
    let aligned: Vec<RowMap> = rows.iter().map(|row| align_row(row, &columns)).collect();
    let count = insert_rows(tx, &staging, &columns, &aligned, options.timezone)?;

    let parked = format!("{}_{}", live, Uuid::new_v4().simple());
    let renames = [
        (live, parked.as_str()),
        (staging.as_str(), live),
        (parked.as_str(), staging.as_str()),
    ];
    for (from, to) in renames {
        let rename = format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(from),
            quote_ident(to)
        );
        run_execute(tx, &rename, &Params::None, options)?;
    }
    run_execute(
        tx,
        &format!("DELETE FROM {}", quote_ident(&staging)),
        &Params::None,
        options,
    )?;
    Ok(count)
}

/// Column names and declared types of an existing table.
fn table_columns(
    conn: &rusqlite::Connection,
    table: &str,
    options: &ConnectionOptions,
) -> DbResult<Option<Vec<Column>>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let info = run_query(conn, &sql, &Params::None, options)?;
    if info.is_empty() {
        return Ok(None);
    }
    info.iter()
        .map(|row| {
            let name = row
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DbError::Query(format!("no column name in table_info for {}", table))
                })?;
            let data_type = row.get("type").and_then(Value::as_str).unwrap_or_default();
            Ok(Column::new(name, data_type))
        })
        .collect::<DbResult<Vec<_>>>()
        .map(Some)
}

/// Columns for a table no preloader declared, typed from the first
/// non-null value in each column.
fn infer_columns(rows: &[RowMap]) -> Vec<Column> {
    let mut names: Vec<&String> = rows.iter().flat_map(|row| row.keys()).collect();
    names.sort();
    names.dedup();
    names
        .into_iter()
        .map(|name| {
            let sample = rows
                .iter()
                .filter_map(|row| row.get(name))
                .find(|v| !v.is_null());
            let data_type = match sample {
                Some(Value::Int(_)) => "INTEGER",
                Some(Value::Float(_)) => "REAL",
                Some(Value::Decimal(_)) => "NUMERIC",
                Some(Value::Bool(_)) => "BOOLEAN",
                Some(Value::Timestamp(_)) => "TIMESTAMP",
                _ => "TEXT",
            };
            Column::new(name.clone(), data_type)
        })
        .collect()
}

/// Key a remote row by the local column names, matching case-insensitively.
fn align_row(row: &RowMap, columns: &[String]) -> RowMap {
    columns
        .iter()
        .filter_map(|column| {
            row.get(column)
                .or_else(|| {
                    row.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(column))
                        .map(|(_, v)| v)
                })
                .map(|v| (column.clone(), v.clone()))
        })
        .collect()
}
