mod any;
mod connection;
mod driver;
mod error;
mod handler;
mod input;
mod manager;
pub mod postgres;
pub mod sqlite;
pub mod testing;

pub use any::{AnyConnection, AnyConnector};
pub use connection::{Connection, Connector, Params};
pub use driver::load_driver;
pub use error::{DbError, DbResult, PluginLoadingError};
pub use handler::{log_statement, PreparedState, StatementHandler, OFFSET_PARAM, SIZE_PARAM};
pub use input::IncrementalInput;
pub use manager::{Active, ConnectionGuard, ConnectionManager};
pub use postgres::{PgConnection, PgConnector};
pub use sqlite::{SqliteConnection, SqliteConnector};
