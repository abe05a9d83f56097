//! Persistence and connection configuration.
//!
//! # Responsibility
//! - Describe which table a persistence instance maps and how to reach it.
//! - Load configuration from JSON documents with sensible defaults.
//!
//! # Invariants
//! - `table` and `schema` must be plain SQL identifiers.
//! - `max_page_size` is always positive after validation.

use crate::error::{PersistenceError, PersistenceResult};
use crate::query::validate_identifier;
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Settings for one persistence instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Target table name.
    pub table: String,
    /// Optional SQLite schema (attached database name such as `main`).
    pub schema: Option<String>,
    /// Upper bound for `take` in paged reads.
    pub max_page_size: i64,
    /// Used only when the persistence owns its connection.
    pub connection: ConnectionConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            schema: None,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            connection: ConnectionConfig::default(),
        }
    }
}

impl PersistenceConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: i64) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Parses configuration from JSON text and validates it.
    ///
    /// # Errors
    /// - `Configuration` when the text is not valid JSON for this shape.
    /// - `Configuration` when identifiers or page size are invalid.
    pub fn from_json_str(text: &str) -> PersistenceResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| PersistenceError::Configuration(format!("malformed config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PersistenceResult<()> {
        if self.table.trim().is_empty() {
            return Err(PersistenceError::Configuration(
                "table name is not set".to_string(),
            ));
        }
        validate_identifier(&self.table)?;
        if let Some(schema) = self.schema.as_deref() {
            validate_identifier(schema)?;
        }
        if self.max_page_size <= 0 {
            return Err(PersistenceError::Configuration(format!(
                "max_page_size must be positive, got {}",
                self.max_page_size
            )));
        }
        Ok(())
    }
}

/// Settings for an owned SQLite connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    /// Logical database name reported to callers.
    pub database: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            database: None,
        }
    }
}

impl ConnectionConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Name reported as the database name once opened.
    pub fn database_name(&self) -> String {
        if let Some(name) = self.database.as_deref() {
            return name.to_string();
        }
        self.path
            .as_ref()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "memory".to_string())
    }
}
