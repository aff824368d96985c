//! Postgres session setup with TLS support.

use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres::{Client, Config};
use tokio_postgres_rustls_improved::MakeRustlsConnect;

use rowtide_core::ConnectionSettings;

use crate::error::{DbError, DbResult};

/// Build a session config from the settings. A leading `jdbc:` is accepted
/// and ignored, and explicit credentials override those in the string.
pub fn session_config(settings: &ConnectionSettings) -> DbResult<Config> {
    let url = strip_jdbc_prefix(&settings.connection_string);
    let mut config: Config = url.parse().map_err(|e: tokio_postgres::Error| {
        DbError::Connection(format!("invalid connection string: {}", e))
    })?;

    if let Some(user) = &settings.user {
        config.user(user);
    }
    if let Some(password) = &settings.password {
        config.password(password);
    }
    config.application_name("rowtide");
    Ok(config)
}

/// Connect with TLS settings chosen from the connection string's sslmode.
/// Spawns the connection task and returns only the client.
pub async fn connect(settings: &ConnectionSettings) -> DbResult<Client> {
    let config = session_config(settings)?;

    if requires_tls(&settings.connection_string) {
        let tls = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| DbError::Connection(format!("TLS config error: {}", e)))?
        .with_root_certificates(root_certs())
        .with_no_client_auth();

        let (client, connection) = config
            .connect(MakeRustlsConnect::new(tls))
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        Ok(client)
    } else {
        let (client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        Ok(client)
    }
}

fn root_certs() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn strip_jdbc_prefix(connection_string: &str) -> &str {
    let trimmed = connection_string.trim();
    trimmed.strip_prefix("jdbc:").unwrap_or(trimmed)
}

fn requires_tls(connection_string: &str) -> bool {
    connection_string.contains("sslmode=require")
        || connection_string.contains("sslmode=verify-ca")
        || connection_string.contains("sslmode=verify-full")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jdbc_prefix_is_stripped() {
        let settings = ConnectionSettings::new(
            "postgres",
            "jdbc:postgresql://db.internal:5433/infra",
        )
        .credentials("bob", Some("letmein".into()));
        let config = session_config(&settings).unwrap();
        assert_eq!(config.get_user(), Some("bob"));
        assert_eq!(config.get_dbname(), Some("infra"));
        assert_eq!(config.get_ports(), &[5433]);
    }

    #[test]
    fn test_requires_tls() {
        assert!(requires_tls("postgres://h/db?sslmode=require"));
        assert!(!requires_tls("postgres://h/db"));
    }

    #[test]
    fn test_invalid_connection_string() {
        let settings = ConnectionSettings::new("postgres", "postgres://h:notaport/db");
        assert!(matches!(
            session_config(&settings),
            Err(DbError::Connection(_))
        ));
    }
}
