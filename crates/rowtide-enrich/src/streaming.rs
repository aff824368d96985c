//! Per-record enrichment against a remote database.

use tracing::warn;

use rowtide_config::{StreamingParams, StreamingSettings};
use rowtide_core::{LookupParams, Record, RowMap, Value};
use rowtide_sql::{
    log_statement, AnyConnector, Connection, ConnectionManager, Connector, DbResult, Params,
};

use crate::lookup::{resolve_params, rows_to_value};
use crate::lookup_cache::{CachedPayload, LookupCache};

/// Runs a statement per record, with results memoized by parameter values.
///
/// Query failures are tagged on the record and the default row is attached
/// in place of the result. They never reach the caller.
pub struct StreamingLookup<K: Connector = AnyConnector> {
    manager: ConnectionManager<K>,
    statement: String,
    bindings: LookupParams,
    prepared_name: Option<String>,
    target: String,
    default_array: Value,
    tag_on_failure: Vec<String>,
    tag_on_default_use: Vec<String>,
    cache: LookupCache,
}

impl StreamingLookup<AnyConnector> {
    pub fn from_settings(settings: &StreamingSettings) -> Self {
        let connector = AnyConnector::new(settings.connection.clone(), settings.options.clone());
        let manager =
            ConnectionManager::new(connector, settings.options.clone(), settings.connect_retry)
                .keep_open(true);
        Self::new(manager, settings)
    }
}

impl<K: Connector> StreamingLookup<K> {
    pub fn new(manager: ConnectionManager<K>, settings: &StreamingSettings) -> Self {
        let (bindings, prepared_name) = match &settings.parameters {
            StreamingParams::Named(bindings) => (LookupParams::Named(bindings.clone()), None),
            StreamingParams::Prepared { name, bind_values } => (
                LookupParams::Positional(bind_values.clone()),
                Some(name.clone()),
            ),
        };
        let default_array = match &settings.default_hash {
            Some(default) => Value::Array(vec![Value::Object(default.clone())]),
            None => Value::Array(Vec::new()),
        };
        Self {
            manager,
            statement: settings.statement.clone(),
            bindings,
            prepared_name,
            target: settings.target.clone(),
            default_array,
            tag_on_failure: settings.tag_on_failure.clone(),
            tag_on_default_use: settings.tag_on_default_use.clone(),
            cache: LookupCache::new(settings.cache.as_ref()),
        }
    }

    pub fn manager(&self) -> &ConnectionManager<K> {
        &self.manager
    }

    /// Enrich one record.
    pub async fn filter(&self, record: &mut Record) {
        let payload = match resolve_params(&self.bindings, record) {
            Ok(params) => {
                self.cache
                    .get(&params, || async {
                        match self.query(&params).await {
                            Ok(rows) => CachedPayload {
                                rows,
                                failed: false,
                            },
                            Err(e) => {
                                warn!(
                                    statement = %self.statement,
                                    error = %e,
                                    "Exception when executing lookup query"
                                );
                                CachedPayload::failed()
                            }
                        }
                    })
                    .await
            }
            Err(binding) => {
                warn!(
                    parameter = %binding.describe(),
                    "Parameter field not found in record"
                );
                CachedPayload::failed().into()
            }
        };

        if payload.failed {
            for tag in &self.tag_on_failure {
                record.tag(tag);
            }
        }

        let value = if payload.is_empty() {
            for tag in &self.tag_on_default_use {
                record.tag(tag);
            }
            self.default_array.clone()
        } else {
            rows_to_value(payload.rows.clone())
        };

        if let Err(e) = record.set(&self.target, value) {
            warn!(field = %self.target, error = %e, "Could not set lookup target");
        }
    }

    async fn query(&self, params: &Params) -> DbResult<Vec<RowMap>> {
        let mut guard = self.manager.lock().await;
        let result = {
            let active = guard.open().await?;
            log_statement(active.sql_log_level, &self.statement, params);
            match &self.prepared_name {
                Some(name) => self.run_prepared(active.conn, name, params).await,
                None => active.conn.query(&self.statement, params).await,
            }
        };
        // The session is kept open between records, so drop a broken one.
        if let Err(e) = &result {
            if e.is_connection_error() {
                guard.close();
            }
        }
        result
    }

    async fn run_prepared(
        &self,
        conn: &K::Conn,
        name: &str,
        params: &Params,
    ) -> DbResult<Vec<RowMap>> {
        if !conn.is_prepared(name) {
            conn.prepare(name, &self.statement).await?;
        }
        let values = match params {
            Params::Positional(values) => values.as_slice(),
            _ => &[],
        };
        conn.query_prepared(name, values).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use rowtide_config::CacheSettings;
    use rowtide_core::{row, ConnectionOptions, ConnectionSettings, ParamBinding, RetryPolicy};
    use rowtide_sql::testing::{MockCall, MockConnector};
    use rowtide_sql::DbError;

    fn settings(parameters: StreamingParams) -> StreamingSettings {
        StreamingSettings {
            connection: ConnectionSettings::new("postgres", "postgres://localhost/infra"),
            options: ConnectionOptions::default(),
            connect_retry: RetryPolicy::once(),
            statement: "SELECT name FROM servers WHERE ip = :ip".into(),
            parameters,
            target: "server".into(),
            default_hash: None,
            tag_on_failure: vec!["_failed".into()],
            tag_on_default_use: vec!["_default".into()],
            cache: Some(CacheSettings {
                max_entries: 100,
                expiration: Duration::from_secs(60),
            }),
        }
    }

    fn named() -> StreamingParams {
        StreamingParams::Named(vec![("ip".into(), ParamBinding::Field("[host][ip]".into()))])
    }

    fn lookup(
        mock: &MockConnector,
        settings: &StreamingSettings,
    ) -> StreamingLookup<MockConnector> {
        let manager =
            ConnectionManager::new(mock.clone(), ConnectionOptions::default(), RetryPolicy::once())
                .keep_open(true);
        StreamingLookup::new(manager, settings)
    }

    fn record(ip: &str) -> Record {
        let mut r = Record::new();
        r.set("[host][ip]", Value::from(ip)).unwrap();
        r
    }

    #[tokio::test]
    async fn test_filter_sets_target_and_caches() {
        let mock = MockConnector::with_responder(|call| {
            let ip = call.param("ip").and_then(Value::as_str).unwrap_or_default();
            Ok(vec![row([("name", format!("server-{}", ip))])])
        });
        let lookup = lookup(&mock, &settings(named()));

        let mut first = record("10.1.1.1");
        lookup.filter(&mut first).await;
        let mut second = record("10.1.1.1");
        lookup.filter(&mut second).await;

        let expected = Value::Array(vec![Value::Object(row([("name", "server-10.1.1.1")]))]);
        assert_eq!(first.get("server"), Some(&expected));
        assert_eq!(second.get("server"), Some(&expected));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_uses_default_and_tags() {
        let mock = MockConnector::new();
        mock.fail_queries_with(DbError::Query("relation does not exist".into()), 1);
        let mut s = settings(named());
        let mut default = HashMap::new();
        default.insert("name".to_string(), Value::from("unknown"));
        s.default_hash = Some(default.clone());
        let lookup = lookup(&mock, &s);

        let mut r = record("10.1.1.1");
        lookup.filter(&mut r).await;
        assert_eq!(r.tags(), vec!["_failed", "_default"]);
        assert_eq!(
            r.get("server"),
            Some(&Value::Array(vec![Value::Object(default)]))
        );
    }

    #[tokio::test]
    async fn test_empty_result_without_default() {
        let mock = MockConnector::new();
        let lookup = lookup(&mock, &settings(named()));
        let mut r = record("10.1.1.1");
        lookup.filter(&mut r).await;
        assert_eq!(r.tags(), vec!["_default"]);
        assert_eq!(r.get("server"), Some(&Value::Array(vec![])));
    }

    #[tokio::test]
    async fn test_unresolved_parameter_skips_query() {
        let mock = MockConnector::new();
        let lookup = lookup(&mock, &settings(named()));
        let mut r = Record::new();
        lookup.filter(&mut r).await;
        assert_eq!(mock.call_count(), 0);
        assert_eq!(r.tags(), vec!["_failed", "_default"]);
    }

    #[tokio::test]
    async fn test_connection_error_reconnects_for_next_record() {
        let mock = MockConnector::with_rows(vec![row([("name", "ldn-server-1")])]);
        mock.fail_queries_with(DbError::Connection("server closed the connection".into()), 1);
        let lookup = lookup(&mock, &settings(named()));

        let mut failed = record("10.1.1.1");
        lookup.filter(&mut failed).await;
        assert_eq!(failed.tags(), vec!["_failed", "_default"]);

        let mut next = record("10.2.2.2");
        lookup.filter(&mut next).await;
        assert!(next.tags().is_empty());
        assert_eq!(
            next.get("server"),
            Some(&Value::Array(vec![Value::Object(row([("name", "ldn-server-1")]))]))
        );
        assert_eq!(mock.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_prepared_mode_prepares_once() {
        let mock = MockConnector::with_rows(vec![row([("name", "ldn-server-1")])]);
        let mut s = settings(StreamingParams::Prepared {
            name: "server_by_ip".into(),
            bind_values: vec![ParamBinding::Field("[host][ip]".into())],
        });
        s.statement = "SELECT name FROM servers WHERE ip = ?".into();
        s.cache = None;
        let lookup = lookup(&mock, &s);

        for ip in ["10.1.1.1", "10.2.2.2"] {
            let mut r = record(ip);
            lookup.filter(&mut r).await;
        }
        assert_eq!(mock.prepares().len(), 1);
        match &mock.calls()[1] {
            MockCall::Prepared { name, values } => {
                assert_eq!(name, "server_by_ip");
                assert_eq!(values, &vec![Value::from("10.2.2.2")]);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }
}
