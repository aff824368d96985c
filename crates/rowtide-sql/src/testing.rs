//! A scriptable in-process backend for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rowtide_core::{RowMap, Value};

use crate::connection::{Connection, Connector, Params};
use crate::error::{DbError, DbResult};

/// A statement the mock received.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Query { sql: String, params: Params },
    Execute { sql: String, params: Params },
    Prepared { name: String, values: Vec<Value> },
}

impl MockCall {
    pub fn sql(&self) -> Option<&str> {
        match self {
            MockCall::Query { sql, .. } | MockCall::Execute { sql, .. } => Some(sql),
            MockCall::Prepared { .. } => None,
        }
    }

    /// Look up a named parameter of a query call.
    pub fn param(&self, name: &str) -> Option<&Value> {
        match self {
            MockCall::Query {
                params: Params::Named(p),
                ..
            }
            | MockCall::Execute {
                params: Params::Named(p),
                ..
            } => p.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

type Responder = Arc<dyn Fn(&MockCall) -> DbResult<Vec<RowMap>> + Send + Sync>;

#[derive(Default)]
struct MockState {
    connect_attempts: u32,
    connect_failures: u32,
    connect_error: Option<DbError>,
    query_failures: u32,
    query_error: Option<DbError>,
    calls: Vec<MockCall>,
    prepares: Vec<(String, String)>,
    /// Prepared statements per connection id.
    prepared: HashMap<u64, HashMap<String, String>>,
    opened: u64,
    /// Connections with an id at or below this report invalid.
    invalid_through: u64,
}

/// A mock connector whose connections answer from a responder closure.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    responder: Responder,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Every statement returns no rows.
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(Vec::new()))
    }

    pub fn with_responder(
        responder: impl Fn(&MockCall) -> DbResult<Vec<RowMap>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            responder: Arc::new(responder),
        }
    }

    /// Every statement returns the same rows.
    pub fn with_rows(rows: Vec<RowMap>) -> Self {
        Self::with_responder(move |_| Ok(rows.clone()))
    }

    /// Fail the next `n` connects with a connection error.
    pub fn fail_connects(&self, n: u32) {
        self.fail_connects_with(DbError::Connection("connection refused".into()), n);
    }

    pub fn fail_connects_with(&self, error: DbError, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.connect_failures = n;
        state.connect_error = Some(error);
    }

    /// Fail the next `n` statements with a query error.
    pub fn fail_queries(&self, n: u32) {
        self.fail_queries_with(DbError::Query("injected failure".into()), n);
    }

    pub fn fail_queries_with(&self, error: DbError, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.query_failures = n;
        state.query_error = Some(error);
    }

    /// Make every connection opened so far fail validation.
    pub fn invalidate_connections(&self) {
        let mut state = self.state.lock().unwrap();
        state.invalid_through = state.opened;
    }

    /// Drop prepared statements on every open connection, as a server
    /// restart would.
    pub fn forget_prepared(&self) {
        self.state.lock().unwrap().prepared.clear();
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn connections_opened(&self) -> u64 {
        self.state.lock().unwrap().opened
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Statements prepared so far as `(name, sql)`.
    pub fn prepares(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().prepares.clone()
    }
}

impl Connector for MockConnector {
    type Conn = MockConnection;

    async fn connect(&self) -> DbResult<MockConnection> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;

        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(state
                .connect_error
                .clone()
                .unwrap_or_else(|| DbError::Connection("connection refused".into())));
        }

        state.opened += 1;
        Ok(MockConnection {
            id: state.opened,
            state: self.state.clone(),
            responder: self.responder.clone(),
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

pub struct MockConnection {
    id: u64,
    state: Arc<Mutex<MockState>>,
    responder: Responder,
}

impl MockConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn record(&self, call: MockCall) -> DbResult<Vec<RowMap>> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call.clone());
            if state.query_failures > 0 {
                state.query_failures -= 1;
                return Err(state
                    .query_error
                    .clone()
                    .unwrap_or_else(|| DbError::Query("injected failure".into())));
            }
        }
        (self.responder)(&call)
    }
}

impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &Params) -> DbResult<Vec<RowMap>> {
        self.record(MockCall::Query {
            sql: sql.to_string(),
            params: params.clone(),
        })
    }

    async fn execute(&self, sql: &str, params: &Params) -> DbResult<u64> {
        self.record(MockCall::Execute {
            sql: sql.to_string(),
            params: params.clone(),
        })
        .map(|rows| rows.len() as u64)
    }

    async fn prepare(&self, name: &str, sql: &str) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.prepares.push((name.to_string(), sql.to_string()));
        state
            .prepared
            .entry(self.id)
            .or_default()
            .insert(name.to_string(), sql.to_string());
        Ok(())
    }

    fn is_prepared(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .prepared
            .get(&self.id)
            .is_some_and(|p| p.contains_key(name))
    }

    async fn query_prepared(&self, name: &str, values: &[Value]) -> DbResult<Vec<RowMap>> {
        if !self.is_prepared(name) {
            return Err(DbError::Prepare {
                name: name.to_string(),
                message: "not prepared on this connection".into(),
            });
        }
        self.record(MockCall::Prepared {
            name: name.to_string(),
            values: values.to_vec(),
        })
    }

    async fn is_valid(&self) -> bool {
        self.id > self.state.lock().unwrap().invalid_through
    }
}
