//! Connection providers consumed by persistence instances.
//!
//! # Responsibility
//! - Define the provider contract the engine opens/queries/closes.
//! - Provide a SQLite implementation backed by `ConnectionConfig`.
//!
//! # Invariants
//! - `connection()` returns `Some` only while the provider is open.
//! - `open` on an open provider and `close` on a closed one are no-ops.

use super::open::open_connection;
use crate::config::ConnectionConfig;
use crate::error::{PersistenceError, PersistenceResult};
use log::info;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Connection handle shared between a provider and its persistences.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Locks a shared connection, recovering from poisoning.
///
/// A panic while holding the lock leaves SQLite itself consistent; the
/// statement in flight is simply abandoned.
pub fn lock_connection(conn: &SharedConnection) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// External collaborator that owns connection lifecycle.
pub trait ConnectionProvider: Send + Sync {
    fn open(&self) -> PersistenceResult<()>;
    fn is_open(&self) -> bool;
    /// Live handle, or `None` when closed.
    fn connection(&self) -> Option<SharedConnection>;
    fn database_name(&self) -> String;
    fn close(&self) -> PersistenceResult<()>;
}

/// Provider opening one SQLite connection from configuration.
#[derive(Debug)]
pub struct SqliteConnectionProvider {
    config: ConnectionConfig,
    handle: Mutex<Option<SharedConnection>>,
}

impl SqliteConnectionProvider {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
        }
    }

    /// Opens a provider over an in-memory database.
    pub fn open_in_memory() -> PersistenceResult<Self> {
        let provider = Self::new(ConnectionConfig::in_memory());
        provider.open()?;
        Ok(provider)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn handle(&self) -> MutexGuard<'_, Option<SharedConnection>> {
        // A poisoned slot still holds a coherent Option.
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConnectionProvider for SqliteConnectionProvider {
    fn open(&self) -> PersistenceResult<()> {
        let mut handle = self.handle();
        if handle.is_some() {
            return Ok(());
        }
        let conn = open_connection(&self.config)?;
        *handle = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle().is_some()
    }

    fn connection(&self) -> Option<SharedConnection> {
        self.handle().clone()
    }

    fn database_name(&self) -> String {
        self.config.database_name()
    }

    fn close(&self) -> PersistenceResult<()> {
        let Some(shared) = self.handle().take() else {
            return Ok(());
        };
        info!(
            "event=db_close module=db status=ok database={}",
            self.config.database_name()
        );
        // Other holders may still reference the handle; the connection is
        // released when the last one drops.
        match Arc::try_unwrap(shared) {
            Ok(mutex) => {
                let conn = mutex
                    .into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                conn.close()
                    .map_err(|(_, err)| PersistenceError::Connection(err.to_string()))
            }
            Err(_) => Ok(()),
        }
    }
}
