use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timezone::TimezoneSpec;

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Postgres,
    Sqlite,
}

impl DriverKind {
    /// Look up a driver by name. Class names used by JDBC drivers are accepted
    /// as aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "org.postgresql.driver" => Some(DriverKind::Postgres),
            "sqlite" | "sqlite3" | "org.sqlite.jdbc" => Some(DriverKind::Sqlite),
            _ => None,
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Postgres => write!(f, "postgres"),
            DriverKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Where and how to connect.
#[derive(Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Driver name, resolved to a [`DriverKind`] when the driver is loaded.
    pub driver: String,
    /// Extra driver libraries that must be present before connecting.
    pub driver_library: Vec<PathBuf>,
    pub connection_string: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionSettings {
    pub fn new(driver: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            driver_library: Vec::new(),
            connection_string: connection_string.into(),
            user: None,
            password: None,
        }
    }

    pub fn credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = Some(user.into());
        self.password = password;
        self
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("driver", &self.driver)
            .field("driver_library", &self.driver_library)
            .field("connection_string", &self.connection_string)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Level at which statements are logged before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

/// Options applied to every connection a manager opens.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Rows fetched per round trip when streaming results.
    pub fetch_size: Option<u32>,
    /// Fold column names to lower case in result rows.
    pub lowercase_column_names: bool,
    /// Check the connection before reuse once `validation_timeout` has passed.
    pub validate_connection: bool,
    pub validation_timeout: Duration,
    /// Maximum wait for a new connection before it counts as a failure.
    pub pool_timeout: Duration,
    /// Zone used to interpret zone-less temporal values.
    pub timezone: Option<TimezoneSpec>,
    pub sql_log_level: SqlLogLevel,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            fetch_size: None,
            lowercase_column_names: true,
            validate_connection: false,
            validation_timeout: Duration::from_secs(3600),
            pool_timeout: Duration::from_secs(5),
            timezone: None,
            sql_log_level: SqlLogLevel::Info,
        }
    }
}

/// Fixed-wait retry policy. `attempts` counts total tries, so 1 means no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, wait: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            wait,
        }
    }

    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(500))
    }
}
