use rowtide_core::{ConnectionOptions, ConnectionSettings, DriverKind, RowMap, Value};

use crate::connection::{Connection, Connector, Params};
use crate::driver::load_driver;
use crate::error::DbResult;
use crate::postgres::{PgConnection, PgConnector};
use crate::sqlite::{SqliteConnection, SqliteConnector};

/// Connector for whichever driver the settings name. The driver is loaded
/// on first connect, so an unknown driver surfaces as a plugin-loading
/// error the first time a connection is needed.
pub struct AnyConnector {
    settings: ConnectionSettings,
    options: ConnectionOptions,
}

impl AnyConnector {
    pub fn new(settings: ConnectionSettings, options: ConnectionOptions) -> Self {
        Self { settings, options }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }
}

impl Connector for AnyConnector {
    type Conn = AnyConnection;

    async fn connect(&self) -> DbResult<AnyConnection> {
        match load_driver(&self.settings)? {
            DriverKind::Postgres => {
                let connector = PgConnector::new(self.settings.clone(), self.options.clone());
                Ok(AnyConnection::Postgres(connector.connect().await?))
            }
            DriverKind::Sqlite => {
                let connector = SqliteConnector::new(&self.settings, self.options.clone());
                Ok(AnyConnection::Sqlite(connector.open()?))
            }
        }
    }

    fn describe(&self) -> String {
        match DriverKind::from_name(&self.settings.driver) {
            Some(DriverKind::Postgres) => {
                PgConnector::new(self.settings.clone(), self.options.clone()).describe()
            }
            Some(DriverKind::Sqlite) => {
                SqliteConnector::new(&self.settings, self.options.clone()).describe()
            }
            None => format!("{} (unknown driver)", self.settings.driver),
        }
    }
}

pub enum AnyConnection {
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl Connection for AnyConnection {
    async fn query(&self, sql: &str, params: &Params) -> DbResult<Vec<RowMap>> {
        match self {
            AnyConnection::Postgres(c) => c.query(sql, params).await,
            AnyConnection::Sqlite(c) => c.query(sql, params).await,
        }
    }

    async fn execute(&self, sql: &str, params: &Params) -> DbResult<u64> {
        match self {
            AnyConnection::Postgres(c) => c.execute(sql, params).await,
            AnyConnection::Sqlite(c) => c.execute(sql, params).await,
        }
    }

    async fn prepare(&self, name: &str, sql: &str) -> DbResult<()> {
        match self {
            AnyConnection::Postgres(c) => c.prepare(name, sql).await,
            AnyConnection::Sqlite(c) => c.prepare(name, sql).await,
        }
    }

    fn is_prepared(&self, name: &str) -> bool {
        match self {
            AnyConnection::Postgres(c) => c.is_prepared(name),
            AnyConnection::Sqlite(c) => c.is_prepared(name),
        }
    }

    async fn query_prepared(&self, name: &str, values: &[Value]) -> DbResult<Vec<RowMap>> {
        match self {
            AnyConnection::Postgres(c) => c.query_prepared(name, values).await,
            AnyConnection::Sqlite(c) => c.query_prepared(name, values).await,
        }
    }

    async fn is_valid(&self) -> bool {
        match self {
            AnyConnection::Postgres(c) => c.is_valid().await,
            AnyConnection::Sqlite(c) => c.is_valid().await,
        }
    }
}
