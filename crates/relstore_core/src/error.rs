//! Error taxonomy shared by every persistence layer.
//!
//! # Responsibility
//! - Classify failures into configuration, connection, cancellation, store
//!   and conversion categories.
//! - Keep store errors opaque: SQLite failures pass through unchanged.
//!
//! # Invariants
//! - Not-found on single-record reads/deletes is never an error; callers get
//!   `None` instead.
//! - Malformed caller-supplied filter/sort text surfaces as `Store`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug)]
pub enum PersistenceError {
    /// Persistence was configured or opened without a usable connection.
    Configuration(String),
    /// Connection provider is not open or failed to connect.
    Connection(String),
    /// Shutdown or caller cancellation was observed mid-operation.
    OperationTerminated {
        table: String,
        operation: &'static str,
    },
    /// Opaque passthrough of SQLite errors.
    Store(rusqlite::Error),
    /// Record/row conversion failed.
    Conversion(String),
    /// Schema bootstrap failed while opening.
    SchemaBootstrap {
        table: String,
        source: Box<PersistenceError>,
    },
}

impl PersistenceError {
    pub(crate) fn terminated(table: &str, operation: &'static str) -> Self {
        Self::OperationTerminated {
            table: table.to_string(),
            operation,
        }
    }

    /// Short stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection(_) => "connection",
            Self::OperationTerminated { .. } => "operation_terminated",
            Self::Store(_) => "store",
            Self::Conversion(_) => "conversion",
            Self::SchemaBootstrap { .. } => "schema_bootstrap",
        }
    }
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "invalid configuration: {message}"),
            Self::Connection(message) => write!(f, "connection error: {message}"),
            Self::OperationTerminated { table, operation } => write!(
                f,
                "operation `{operation}` on table `{table}` was terminated"
            ),
            Self::Store(err) => write!(f, "{err}"),
            Self::Conversion(message) => write!(f, "conversion failed: {message}"),
            Self::SchemaBootstrap { table, source } => {
                write!(f, "schema bootstrap for table `{table}` failed: {source}")
            }
        }
    }
}

impl Error for PersistenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::SchemaBootstrap { source, .. } => Some(source.as_ref()),
            Self::Configuration(_) => None,
            Self::Connection(_) => None,
            Self::OperationTerminated { .. } => None,
            Self::Conversion(_) => None,
        }
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Conversion(value.to_string())
    }
}
