//! Connection ownership, validation and connect retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use rowtide_core::{ConnectionOptions, RetryPolicy, SqlLogLevel};

use crate::connection::{Connection, Connector};
use crate::error::DbResult;

struct Slot<C> {
    conn: C,
    generation: u64,
    last_validated: Instant,
}

/// Owns at most one open connection for a component.
///
/// All work goes through [`ConnectionManager::lock`], which serializes users
/// of the instance. The connection is closed when the guard drops unless the
/// manager was built with `keep_open`.
pub struct ConnectionManager<K: Connector> {
    connector: K,
    options: ConnectionOptions,
    retry: RetryPolicy,
    keep_open: bool,
    slot: Mutex<Option<Slot<K::Conn>>>,
    generation: AtomicU64,
}

impl<K: Connector> ConnectionManager<K> {
    pub fn new(connector: K, options: ConnectionOptions, retry: RetryPolicy) -> Self {
        Self {
            connector,
            options,
            retry,
            keep_open: false,
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Keep the connection open between uses.
    pub fn keep_open(mut self, keep_open: bool) -> Self {
        self.keep_open = keep_open;
        self
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Take the instance lock. Waits while another caller holds it.
    pub async fn lock(&self) -> ConnectionGuard<'_, K> {
        ConnectionGuard {
            manager: self,
            slot: self.slot.lock().await,
        }
    }

    /// Close any open connection.
    pub async fn close(&self) {
        self.lock().await.close();
    }

    async fn connect_with_retry(&self) -> DbResult<K::Conn> {
        let mut attempt = 1;
        loop {
            match self.connector.connect().await {
                Ok(conn) => {
                    debug!(target_db = %self.connector.describe(), attempt, "Connected");
                    return Ok(conn);
                }
                Err(e) if e.is_connection_error() && attempt < self.retry.attempts => {
                    warn!(
                        target_db = %self.connector.describe(),
                        attempt,
                        max_attempts = self.retry.attempts,
                        error = %e,
                        "Failed to connect, retrying"
                    );
                    tokio::time::sleep(self.retry.wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exclusive access to a manager's connection slot.
pub struct ConnectionGuard<'a, K: Connector> {
    manager: &'a ConnectionManager<K>,
    slot: MutexGuard<'a, Option<Slot<K::Conn>>>,
}

/// A usable connection borrowed from a guard.
pub struct Active<'g, C> {
    pub conn: &'g C,
    /// Changes whenever the underlying connection is replaced.
    pub generation: u64,
    pub sql_log_level: SqlLogLevel,
}

impl<K: Connector> ConnectionGuard<'_, K> {
    /// Return the open connection, connecting (with retry) if there is none
    /// and re-validating one that has been idle past the validation timeout.
    pub async fn open(&mut self) -> DbResult<Active<'_, K::Conn>> {
        let options = &self.manager.options;
        let stale = match self.slot.as_ref() {
            Some(slot) => {
                options.validate_connection
                    && slot.last_validated.elapsed() >= options.validation_timeout
            }
            None => false,
        };

        if stale {
            let valid = match self.slot.as_ref() {
                Some(slot) => slot.conn.is_valid().await,
                None => false,
            };
            if valid {
                if let Some(slot) = self.slot.as_mut() {
                    slot.last_validated = Instant::now();
                }
            } else {
                warn!(
                    target_db = %self.manager.connector.describe(),
                    "Connection failed validation, reconnecting"
                );
                *self.slot = None;
            }
        }

        if self.slot.is_none() {
            let conn = self.manager.connect_with_retry().await?;
            let generation = self.manager.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                target_db = %self.manager.connector.describe(),
                generation,
                "Opened connection"
            );
            *self.slot = Some(Slot {
                conn,
                generation,
                last_validated: Instant::now(),
            });
        }

        match self.slot.as_ref() {
            Some(slot) => Ok(Active {
                conn: &slot.conn,
                generation: slot.generation,
                sql_log_level: self.manager.options.sql_log_level,
            }),
            None => Err(crate::error::DbError::Connection(
                "connection slot empty after connect".into(),
            )),
        }
    }

    /// Drop the current connection so the next `open` reconnects.
    pub fn close(&mut self) {
        if let Some(slot) = self.slot.take() {
            debug!(generation = slot.generation, "Closed connection");
        }
    }
}

impl<K: Connector> Drop for ConnectionGuard<'_, K> {
    fn drop(&mut self) {
        if !self.manager.keep_open {
            self.close();
        }
    }
}
