//! Statement execution strategies for the incremental input.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, error, info, warn};

use rowtide_core::{PagingMode, PreparedSpec, RowMap, SqlLogLevel, StatementSpec, Value};

use crate::connection::{Connection, Params};
use crate::error::DbResult;
use crate::manager::Active;

/// Marker names an explicitly paged statement must contain.
pub const OFFSET_PARAM: &str = "offset";
pub const SIZE_PARAM: &str = "size";

/// Log a statement at the configured level before it runs.
pub fn log_statement(level: SqlLogLevel, sql: &str, params: &Params) {
    match level {
        SqlLogLevel::Error => error!(sql, ?params, "Executing statement"),
        SqlLogLevel::Warn => warn!(sql, ?params, "Executing statement"),
        SqlLogLevel::Info => info!(sql, ?params, "Executing statement"),
        SqlLogLevel::Debug => debug!(sql, ?params, "Executing statement"),
    }
}

/// Tracks whether the named statement is usable on the current connection.
#[derive(Debug, Default)]
pub struct PreparedState {
    prepared: AtomicBool,
    generation: AtomicU64,
}

impl PreparedState {
    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    fn mark(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
        self.prepared.store(true, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.prepared.store(false, Ordering::SeqCst);
    }
}

/// How the input's statement is executed.
#[derive(Debug)]
pub enum StatementHandler {
    /// Bind parameters and the checkpoint, run once, yield every row.
    Plain { spec: StatementSpec },
    /// Wrap the statement in `LIMIT`/`OFFSET` pages after counting it.
    Paged { spec: StatementSpec, page_size: usize },
    /// The statement pages itself through `:offset` and `:size`.
    ExplicitPaged { spec: StatementSpec, page_size: usize },
    /// A named statement prepared once per connection.
    Prepared {
        spec: StatementSpec,
        prepared: PreparedSpec,
        state: PreparedState,
    },
}

impl StatementHandler {
    /// Prepared mode wins over paging; paging wins over plain.
    pub fn new(spec: StatementSpec) -> Self {
        if let Some(prepared) = spec.prepared.clone() {
            return StatementHandler::Prepared {
                spec,
                prepared,
                state: PreparedState::default(),
            };
        }
        let paging = spec.paging;
        match paging {
            Some(paging) if paging.mode == PagingMode::Explicit => StatementHandler::ExplicitPaged {
                page_size: paging.page_size.max(1),
                spec,
            },
            Some(paging) => StatementHandler::Paged {
                page_size: paging.page_size.max(1),
                spec,
            },
            None => StatementHandler::Plain { spec },
        }
    }

    pub fn spec(&self) -> &StatementSpec {
        match self {
            StatementHandler::Plain { spec }
            | StatementHandler::Paged { spec, .. }
            | StatementHandler::ExplicitPaged { spec, .. }
            | StatementHandler::Prepared { spec, .. } => spec,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StatementHandler::Plain { .. } => "plain",
            StatementHandler::Paged { .. } => "paged",
            StatementHandler::ExplicitPaged { .. } => "explicit_paged",
            StatementHandler::Prepared { .. } => "prepared",
        }
    }

    /// Run the statement against `active`, passing each row to `emit` in the
    /// order the database returns them.
    pub async fn perform_query<C, F>(
        &self,
        active: &Active<'_, C>,
        last_value: &Value,
        emit: &mut F,
    ) -> DbResult<()>
    where
        C: Connection,
        F: FnMut(RowMap) + Send,
    {
        let level = active.sql_log_level;
        match self {
            StatementHandler::Plain { spec } => {
                let params = Params::Named(spec.bound_parameters(last_value));
                log_statement(level, &spec.sql, &params);
                for row in active.conn.query(&spec.sql, &params).await? {
                    emit(row);
                }
                Ok(())
            }

            StatementHandler::Paged { spec, page_size } => {
                let params = Params::Named(spec.bound_parameters(last_value));
                let inner = spec.sql.trim().trim_end_matches(';');

                let count_sql = format!("SELECT count(*) AS count FROM ({}) AS t1", inner);
                log_statement(level, &count_sql, &params);
                let total = active
                    .conn
                    .query(&count_sql, &params)
                    .await?
                    .first()
                    .and_then(|row| row.get("count"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0)
                    .max(0) as usize;
                debug!(total, page_size, "Counted rows for paging");

                let mut offset = 0;
                while offset < total {
                    let page_sql = format!(
                        "SELECT * FROM ({}) AS t1 LIMIT {} OFFSET {}",
                        inner, page_size, offset
                    );
                    log_statement(level, &page_sql, &params);
                    let rows = active.conn.query(&page_sql, &params).await?;
                    if rows.is_empty() {
                        break;
                    }
                    for row in rows {
                        emit(row);
                    }
                    offset += page_size;
                }
                Ok(())
            }

            StatementHandler::ExplicitPaged { spec, page_size } => {
                let base = spec.bound_parameters(last_value);
                let mut offset = 0;
                loop {
                    let mut bound = base.clone();
                    bound.push((OFFSET_PARAM.to_string(), Value::Int(offset as i64)));
                    bound.push((SIZE_PARAM.to_string(), Value::Int(*page_size as i64)));
                    let params = Params::Named(bound);

                    log_statement(level, &spec.sql, &params);
                    let rows = active.conn.query(&spec.sql, &params).await?;
                    let fetched = rows.len();
                    for row in rows {
                        emit(row);
                    }
                    // A full page means there may be more, even if the
                    // next page turns out to be empty.
                    if fetched < *page_size {
                        break;
                    }
                    offset += page_size;
                }
                Ok(())
            }

            StatementHandler::Prepared {
                spec,
                prepared,
                state,
            } => {
                let stale = !state.is_prepared()
                    || state.generation.load(Ordering::SeqCst) != active.generation
                    || !active.conn.is_prepared(&prepared.name);
                if stale {
                    debug!(statement = %prepared.name, "Preparing statement");
                    if let Err(e) = active.conn.prepare(&prepared.name, &spec.sql).await {
                        state.clear();
                        return Err(e);
                    }
                    state.mark(active.generation);
                }

                let values: Vec<Value> = prepared
                    .bind_values
                    .iter()
                    .map(|b| b.resolve(last_value))
                    .collect();
                log_statement(level, &spec.sql, &Params::Positional(values.clone()));

                match active.conn.query_prepared(&prepared.name, &values).await {
                    Ok(rows) => {
                        for row in rows {
                            emit(row);
                        }
                        Ok(())
                    }
                    Err(e) => {
                        state.clear();
                        Err(e)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowtide_core::{row, BindValue, ConnectionOptions, RetryPolicy};

    use crate::manager::ConnectionManager;
    use crate::testing::{MockCall, MockConnector};

    fn numbered(n: i64) -> Vec<RowMap> {
        (1..=n).map(|i| row([("num", i)])).collect()
    }

    fn manager(mock: &MockConnector) -> ConnectionManager<MockConnector> {
        ConnectionManager::new(mock.clone(), ConnectionOptions::default(), RetryPolicy::once())
            .keep_open(true)
    }

    async fn collect(
        handler: &StatementHandler,
        manager: &ConnectionManager<MockConnector>,
        last: Value,
    ) -> DbResult<Vec<RowMap>> {
        let mut guard = manager.lock().await;
        let active = guard.open().await?;
        let mut rows = Vec::new();
        handler
            .perform_query(&active, &last, &mut |row| rows.push(row))
            .await?;
        Ok(rows)
    }

    #[test]
    fn test_handler_selection() {
        let base = StatementSpec::new("SELECT 1");
        assert_eq!(StatementHandler::new(base.clone()).kind(), "plain");
        assert_eq!(
            StatementHandler::new(base.clone().paged(PagingMode::Auto, 10)).kind(),
            "paged"
        );
        assert_eq!(
            StatementHandler::new(base.clone().paged(PagingMode::Explicit, 10)).kind(),
            "explicit_paged"
        );
        assert_eq!(
            StatementHandler::new(base.prepared("q", vec![])).kind(),
            "prepared"
        );
    }

    #[tokio::test]
    async fn test_plain_binds_checkpoint() {
        let mock = MockConnector::with_rows(numbered(2));
        let handler = StatementHandler::new(
            StatementSpec::new("SELECT * FROM t WHERE num > :sql_last_value"),
        );
        let rows = collect(&handler, &manager(&mock), Value::Int(7)).await.unwrap();
        assert_eq!(rows.len(), 2);

        let calls = mock.calls();
        assert_eq!(calls[0].param("sql_last_value"), Some(&Value::Int(7)));
    }

    #[tokio::test]
    async fn test_explicit_paging_stops_on_short_page() {
        let table = numbered(25);
        let mock = MockConnector::with_responder(move |call| {
            let offset = call.param("offset").and_then(Value::as_i64).unwrap_or(0) as usize;
            let size = call.param("size").and_then(Value::as_i64).unwrap_or(0) as usize;
            Ok(table.iter().skip(offset).take(size).cloned().collect())
        });
        let handler = StatementHandler::new(
            StatementSpec::new("SELECT * FROM t LIMIT :size OFFSET :offset")
                .paged(PagingMode::Explicit, 10),
        );

        let rows = collect(&handler, &manager(&mock), Value::Int(0)).await.unwrap();
        assert_eq!(rows.len(), 25);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_explicit_paging_exact_multiple_fetches_empty_page() {
        let table = numbered(20);
        let mock = MockConnector::with_responder(move |call| {
            let offset = call.param("offset").and_then(Value::as_i64).unwrap_or(0) as usize;
            let size = call.param("size").and_then(Value::as_i64).unwrap_or(0) as usize;
            Ok(table.iter().skip(offset).take(size).cloned().collect())
        });
        let handler = StatementHandler::new(
            StatementSpec::new("SELECT * FROM t LIMIT :size OFFSET :offset")
                .paged(PagingMode::Explicit, 10),
        );

        let rows = collect(&handler, &manager(&mock), Value::Int(0)).await.unwrap();
        assert_eq!(rows.len(), 20);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_auto_paging_counts_then_pages() {
        let mock = MockConnector::with_responder(|call| {
            let sql = call.sql().unwrap_or_default();
            if sql.starts_with("SELECT count(*)") {
                Ok(vec![row([("count", 5i64)])])
            } else if sql.ends_with("OFFSET 4") {
                Ok(numbered(1))
            } else {
                Ok(numbered(2))
            }
        });
        let handler = StatementHandler::new(
            StatementSpec::new("SELECT * FROM t;").paged(PagingMode::Auto, 2),
        );

        let rows = collect(&handler, &manager(&mock), Value::Int(0)).await.unwrap();
        assert_eq!(rows.len(), 5);

        let sqls: Vec<String> = mock
            .calls()
            .iter()
            .filter_map(|c| c.sql().map(str::to_string))
            .collect();
        assert_eq!(
            sqls,
            vec![
                "SELECT count(*) AS count FROM (SELECT * FROM t) AS t1",
                "SELECT * FROM (SELECT * FROM t) AS t1 LIMIT 2 OFFSET 0",
                "SELECT * FROM (SELECT * FROM t) AS t1 LIMIT 2 OFFSET 2",
                "SELECT * FROM (SELECT * FROM t) AS t1 LIMIT 2 OFFSET 4",
            ]
        );
    }

    #[tokio::test]
    async fn test_prepared_resolves_checkpoint_bind_values() {
        let mock = MockConnector::with_rows(numbered(1));
        let handler = StatementHandler::new(
            StatementSpec::new("SELECT * FROM t WHERE num > ? AND kind = ?").prepared(
                "by_num",
                vec![BindValue::LastValue, BindValue::Literal(Value::from("a"))],
            ),
        );
        let manager = manager(&mock);

        collect(&handler, &manager, Value::Int(3)).await.unwrap();
        collect(&handler, &manager, Value::Int(4)).await.unwrap();

        // Same connection, so the statement is prepared once.
        assert_eq!(mock.prepares().len(), 1);
        assert_eq!(
            mock.calls().last(),
            Some(&MockCall::Prepared {
                name: "by_num".into(),
                values: vec![Value::Int(4), Value::from("a")],
            })
        );
    }

    #[tokio::test]
    async fn test_prepared_reprepares_after_failure() {
        let mock = MockConnector::with_rows(numbered(1));
        let handler = StatementHandler::new(
            StatementSpec::new("SELECT * FROM t WHERE num > ?")
                .prepared("by_num", vec![BindValue::LastValue]),
        );
        let manager = manager(&mock);

        collect(&handler, &manager, Value::Int(0)).await.unwrap();
        mock.fail_queries(1);
        assert!(collect(&handler, &manager, Value::Int(0)).await.is_err());
        if let StatementHandler::Prepared { state, .. } = &handler {
            assert!(!state.is_prepared());
        }

        collect(&handler, &manager, Value::Int(0)).await.unwrap();
        assert_eq!(mock.prepares().len(), 2);
    }

    #[tokio::test]
    async fn test_prepared_reprepares_when_connection_lost_statement() {
        let mock = MockConnector::with_rows(numbered(1));
        let handler = StatementHandler::new(
            StatementSpec::new("SELECT * FROM t WHERE num > ?")
                .prepared("by_num", vec![BindValue::LastValue]),
        );
        let manager = manager(&mock);

        collect(&handler, &manager, Value::Int(0)).await.unwrap();
        mock.forget_prepared();
        collect(&handler, &manager, Value::Int(0)).await.unwrap();
        assert_eq!(mock.prepares().len(), 2);
    }
}
