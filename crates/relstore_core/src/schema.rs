//! Idempotent schema bootstrap for one persistence table.
//!
//! # Responsibility
//! - Accumulate opaque DDL statements registered before open.
//! - Apply them once, in order, only when the target table is absent.
//!
//! # Invariants
//! - An existing table is never altered; all DDL is skipped.
//! - Statements run inside one transaction; the first failure aborts and
//!   rolls back the whole bootstrap.

use crate::codec::DATA_FIELD;
use crate::error::PersistenceResult;
use crate::model::identity::ID_FIELD;
use crate::query::{qualified_table_name, quote_identifier};
use log::{error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Instant;

/// One key of an index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    pub column: String,
    pub descending: bool,
}

impl IndexKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub unique: bool,
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self { unique: true }
    }
}

/// Extension point registering DDL before bootstrap.
///
/// Invoked once per open, on a freshly cleared `SchemaManager`.
pub trait SchemaDefinition: Send + Sync {
    fn define_schema(&self, schema: &mut SchemaManager);
}

impl<F> SchemaDefinition for F
where
    F: Fn(&mut SchemaManager) + Send + Sync,
{
    fn define_schema(&self, schema: &mut SchemaManager) {
        self(schema)
    }
}

/// Ordered DDL list bound to one table.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    schema: Option<String>,
    table: String,
    id_column: String,
    data_column: String,
    statements: Vec<String>,
}

impl SchemaManager {
    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
            id_column: ID_FIELD.to_string(),
            data_column: DATA_FIELD.to_string(),
            statements: Vec::new(),
        }
    }

    /// Names the document columns used by `ensure_json_table` and
    /// `ensure_generated_column`.
    pub fn with_document_columns(
        mut self,
        id_column: impl Into<String>,
        data_column: impl Into<String>,
    ) -> Self {
        self.id_column = id_column.into();
        self.data_column = data_column.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Quoted, possibly schema-qualified table name for DDL text.
    pub fn qualified_table(&self) -> String {
        qualified_table_name(self.schema.as_deref(), &self.table)
    }

    /// Registers one opaque DDL statement.
    pub fn ensure_schema(&mut self, ddl: impl Into<String>) {
        self.statements.push(ddl.into());
    }

    /// Registers an index over the target table.
    pub fn ensure_index(&mut self, name: &str, keys: &[IndexKey], options: IndexOptions) {
        let unique = if options.unique { "UNIQUE " } else { "" };
        // SQLite qualifies the index name, not the indexed table.
        let index_name = qualified_table_name(self.schema.as_deref(), name);
        let columns = keys
            .iter()
            .map(|key| {
                let order = if key.descending { "DESC" } else { "ASC" };
                format!("{} {order}", quote_identifier(&key.column))
            })
            .collect::<Vec<_>>()
            .join(", ");
        self.ensure_schema(format!(
            "CREATE {unique}INDEX IF NOT EXISTS {index_name} ON {} ({columns})",
            quote_identifier(&self.table)
        ));
    }

    /// Registers the `(id, data)` table used by the JSON-document layout.
    pub fn ensure_json_table(&mut self, id_type: &str, data_type: &str) {
        self.ensure_schema(format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {id_type} PRIMARY KEY, {} {data_type})",
            self.qualified_table(),
            quote_identifier(&self.id_column),
            quote_identifier(&self.data_column)
        ));
    }

    /// Registers a virtual column extracting `json_path` from the data column.
    ///
    /// Must follow the statement creating the table.
    pub fn ensure_generated_column(&mut self, name: &str, sql_type: &str, json_path: &str) {
        self.ensure_schema(format!(
            "ALTER TABLE {} ADD COLUMN {} {sql_type} GENERATED ALWAYS AS (json_extract({}, '{}')) VIRTUAL",
            self.qualified_table(),
            quote_identifier(name),
            quote_identifier(&self.data_column),
            json_path.replace('\'', "''")
        ));
    }

    pub fn clear_schema(&mut self) {
        self.statements.clear();
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Returns whether the target table exists.
    pub fn table_exists(&self, conn: &Connection) -> PersistenceResult<bool> {
        let master = match self.schema.as_deref() {
            Some(schema) => format!("{}.sqlite_master", quote_identifier(schema)),
            None => "sqlite_master".to_string(),
        };
        let exists: i64 = conn.query_row(
            &format!(
                "SELECT EXISTS(
                    SELECT 1
                    FROM {master}
                    WHERE type = 'table' AND name = ?1
                );"
            ),
            [self.table.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    /// Applies registered DDL when the table is absent.
    ///
    /// Returns `true` when statements were executed.
    pub fn bootstrap(&self, conn: &Connection) -> PersistenceResult<bool> {
        if self.table_exists(conn)? {
            info!(
                "event=schema_bootstrap module=schema status=skipped table={} reason=table_exists",
                self.table
            );
            return Ok(false);
        }
        if self.statements.is_empty() {
            return Ok(false);
        }

        let started_at = Instant::now();
        info!(
            "event=schema_bootstrap module=schema status=start table={} statements={}",
            self.table,
            self.statements.len()
        );

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        for (index, ddl) in self.statements.iter().enumerate() {
            if let Err(err) = tx.execute_batch(ddl) {
                error!(
                    "event=schema_bootstrap module=schema status=error table={} statement_index={} duration_ms={} error={}",
                    self.table,
                    index,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err.into());
            }
        }
        tx.commit()?;

        info!(
            "event=schema_bootstrap module=schema status=ok table={} duration_ms={}",
            self.table,
            started_at.elapsed().as_millis()
        );
        Ok(true)
    }
}
