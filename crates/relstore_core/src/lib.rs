//! Generic relational persistence for typed records.
//! Maps records with a string identity onto SQLite tables, either one
//! column per field or as whole JSON documents.

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod merge;
pub mod model;
pub mod persistence;
pub mod query;
pub mod schema;

pub use codec::{ColumnMap, FlatCodec, JsonDocumentCodec, RecordCodec, StorageLayout};
pub use config::{ConnectionConfig, PersistenceConfig};
pub use db::{ConnectionProvider, SharedConnection, SqliteConnectionProvider};
pub use error::{PersistenceError, PersistenceResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use merge::{JsonMerge, NativeJsonPatch, ReadModifyWrite};
pub use model::context::{CancelSignal, OperationContext};
pub use model::identity::{assign_id, generate_id, Identifiable};
pub use model::paging::{DataPage, PagingParams};
pub use persistence::{PersistenceBuilder, SqlitePersistence};
pub use query::FilterQuery;
pub use schema::{IndexKey, IndexOptions, SchemaDefinition, SchemaManager};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
