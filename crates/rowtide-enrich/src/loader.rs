//! Remote fetch for one snapshot table.

use tracing::debug;

use rowtide_core::{LoaderDef, RowMap};
use rowtide_sql::{AnyConnector, Connection, ConnectionManager, Connector, DbResult, Params};

/// A loader definition bound to the connection it reads from.
pub struct RemoteLoader<K: Connector = AnyConnector> {
    def: LoaderDef,
    manager: ConnectionManager<K>,
}

impl<K: Connector> RemoteLoader<K> {
    pub fn new(def: LoaderDef, manager: ConnectionManager<K>) -> Self {
        Self { def, manager }
    }

    pub fn def(&self) -> &LoaderDef {
        &self.def
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn local_table(&self) -> &str {
        &self.def.local_table
    }

    /// The statement sent to the remote, with `max_rows` applied.
    pub fn statement(&self) -> String {
        match self.def.max_rows {
            Some(limit) => {
                let inner = self.def.query.trim().trim_end_matches(';');
                format!("SELECT * FROM ({}) AS t1 LIMIT {}", inner, limit)
            }
            None => self.def.query.clone(),
        }
    }

    /// Read the full result set from the remote.
    pub async fn fetch(&self) -> DbResult<Vec<RowMap>> {
        let sql = self.statement();
        let mut guard = self.manager.lock().await;
        let active = guard.open().await?;
        debug!(loader = %self.def.id, sql = %sql, "Fetching loader rows");
        active.conn.query(&sql, &Params::None).await
    }
}
