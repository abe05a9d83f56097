//! Generic SQLite-backed CRUD persistence.
//!
//! # Responsibility
//! - Map typed records onto one table through an injected `RecordCodec`.
//! - Provide filtered/paged reads, id-based reads, writes, upserts, partial
//!   updates and deletes.
//! - Manage open/close against a `ConnectionProvider`, bootstrapping the
//!   schema on open.
//!
//! # Invariants
//! - Not-found reads, updates and deletes return `None`, never an error.
//! - Empty id lists are a successful no-op.
//! - Filter/sort/projection text is passed to SQLite verbatim.
//! - Every statement is preceded by, and every fetched row followed by, a
//!   liveness check; shutdown or caller cancellation aborts with
//!   `OperationTerminated`.
//! - An injected provider is never opened or closed here; an owned one is.

use crate::codec::{
    bind_values, column_infos, read_row, ColumnMap, FlatCodec, JsonDocumentCodec, RecordCodec,
    StorageLayout,
};
use crate::config::PersistenceConfig;
use crate::db::{lock_connection, ConnectionProvider, SharedConnection, SqliteConnectionProvider};
use crate::error::{PersistenceError, PersistenceResult};
use crate::merge::{JsonMerge, JsonTarget, NativeJsonPatch};
use crate::model::context::{CancelSignal, OperationContext};
use crate::model::identity::{assign_id, is_zero_id, Identifiable};
use crate::model::paging::{DataPage, PagingParams};
use crate::query::{
    column_list, count_sql, delete_sql, in_list, placeholders, qualified_table_name,
    quote_identifier, set_clause, upsert_assignments, FilterQuery, SelectQuery,
};
use crate::schema::{SchemaDefinition, SchemaManager};
use log::{debug, error, info};
use rand::Rng;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Assembles a `SqlitePersistence` from configuration and strategies.
pub struct PersistenceBuilder<T> {
    config: PersistenceConfig,
    codec: Box<dyn RecordCodec<T>>,
    merge: Box<dyn JsonMerge>,
    schema: Option<Box<dyn SchemaDefinition>>,
    provider: Option<(Arc<dyn ConnectionProvider>, bool)>,
}

impl<T> PersistenceBuilder<T>
where
    T: Identifiable + Serialize + DeserializeOwned + 'static,
{
    /// One column per record field.
    pub fn flat(config: PersistenceConfig) -> Self {
        Self::with_codec(config, Box::new(FlatCodec))
    }

    /// `(id, data)` table holding each record as a JSON document.
    pub fn json_document(config: PersistenceConfig) -> Self {
        Self::with_codec(config, Box::new(JsonDocumentCodec::default()))
    }

    fn with_codec(config: PersistenceConfig, codec: Box<dyn RecordCodec<T>>) -> Self {
        Self {
            config,
            codec,
            merge: Box::new(NativeJsonPatch),
            schema: None,
            provider: None,
        }
    }

    /// Replaces the record codec.
    pub fn codec(mut self, codec: impl RecordCodec<T> + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Replaces the JSON partial-merge strategy.
    pub fn merge(mut self, merge: impl JsonMerge + 'static) -> Self {
        self.merge = Box::new(merge);
        self
    }

    /// Registers DDL applied on open when the table is absent.
    pub fn schema(mut self, definition: impl SchemaDefinition + 'static) -> Self {
        self.schema = Some(Box::new(definition));
        self
    }

    /// Uses an externally managed provider, which is never closed here.
    pub fn provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.provider = Some((provider, false));
        self
    }

    /// Hands over a provider the persistence opens on `open` and closes on
    /// `close`, like the default SQLite one.
    pub fn owned_provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.provider = Some((provider, true));
        self
    }

    /// # Errors
    /// - `Configuration` when the table/schema names or page size are invalid.
    pub fn build(self) -> PersistenceResult<SqlitePersistence<T>> {
        self.config.validate()?;
        let (provider, owns_provider) = match self.provider {
            Some(provided) => provided,
            None => {
                let owned: Arc<dyn ConnectionProvider> = Arc::new(SqliteConnectionProvider::new(
                    self.config.connection.clone(),
                ));
                (owned, true)
            }
        };
        Ok(SqlitePersistence {
            table_name: qualified_table_name(self.config.schema.as_deref(), &self.config.table),
            config: self.config,
            codec: self.codec,
            merge: self.merge,
            schema: self.schema,
            provider,
            owns_provider,
            state: Mutex::new(EngineState::default()),
        })
    }
}

#[derive(Default)]
struct EngineState {
    connection: Option<SharedConnection>,
    database_name: Option<String>,
    shutdown: CancelSignal,
}

/// Checks caller cancellation and engine shutdown for one operation.
struct Liveness<'a> {
    ctx: &'a OperationContext,
    shutdown: &'a CancelSignal,
    table: &'a str,
    operation: &'static str,
}

impl Liveness<'_> {
    fn check(&self) -> PersistenceResult<()> {
        if self.shutdown.is_cancelled() || self.ctx.is_cancelled() {
            return Err(PersistenceError::terminated(self.table, self.operation));
        }
        Ok(())
    }
}

/// CRUD engine mapping records of type `T` onto one SQLite table.
pub struct SqlitePersistence<T> {
    config: PersistenceConfig,
    table_name: String,
    codec: Box<dyn RecordCodec<T>>,
    merge: Box<dyn JsonMerge>,
    schema: Option<Box<dyn SchemaDefinition>>,
    provider: Arc<dyn ConnectionProvider>,
    owns_provider: bool,
    state: Mutex<EngineState>,
}

impl<T> SqlitePersistence<T>
where
    T: Identifiable + Serialize + DeserializeOwned,
{
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Quoted, possibly schema-qualified table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn is_open(&self) -> bool {
        self.state().connection.is_some()
    }

    /// Database name reported by the provider while open.
    pub fn database_name(&self) -> Option<String> {
        self.state().database_name.clone()
    }

    /// Acquires a connection and bootstraps the schema.
    ///
    /// Opening an open persistence is a no-op.
    ///
    /// # Errors
    /// - `Connection` when the provider cannot be opened or is not open.
    /// - `Configuration` when an open provider exposes no connection.
    /// - `SchemaBootstrap` when registered DDL fails; the persistence stays
    ///   closed.
    pub fn open(&self, ctx: &OperationContext) -> PersistenceResult<()> {
        let mut state = self.state();
        if state.connection.is_some() {
            return Ok(());
        }
        let started_at = Instant::now();

        if self.owns_provider {
            self.provider.open()?;
        }
        if !self.provider.is_open() {
            self.release_owned_provider();
            return Err(PersistenceError::Connection(
                "connection provider is not opened".to_string(),
            ));
        }
        let Some(conn) = self.provider.connection() else {
            self.release_owned_provider();
            return Err(PersistenceError::Configuration(
                "connection provider returned no connection".to_string(),
            ));
        };

        let mut schema = SchemaManager::new(self.config.schema.as_deref(), &self.config.table);
        if let StorageLayout::JsonDocument { data_column } = self.codec.layout() {
            schema = schema.with_document_columns(self.codec.id_column(), data_column);
        }
        if let Some(definition) = self.schema.as_ref() {
            definition.define_schema(&mut schema);
        }
        let bootstrapped = schema.bootstrap(&lock_connection(&conn));
        if let Err(err) = bootstrapped {
            error!(
                "event=persistence_open module=persistence status=error table={} trace_id={} error_code={} error={}",
                self.config.table,
                ctx.trace_label(),
                err.code(),
                err
            );
            self.release_owned_provider();
            return Err(PersistenceError::SchemaBootstrap {
                table: self.config.table.clone(),
                source: Box::new(err),
            });
        }

        state.connection = Some(conn);
        state.database_name = Some(self.provider.database_name());
        state.shutdown = CancelSignal::new();
        info!(
            "event=persistence_open module=persistence status=ok table={} database={} trace_id={} duration_ms={}",
            self.config.table,
            self.provider.database_name(),
            ctx.trace_label(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Signals shutdown and forgets the connection.
    ///
    /// Operations iterating rows abort on their next row. Closing a closed
    /// persistence is a no-op.
    pub fn close(&self, ctx: &OperationContext) -> PersistenceResult<()> {
        let mut state = self.state();
        if state.connection.take().is_none() {
            return Ok(());
        }
        state.shutdown.cancel();
        state.database_name = None;
        drop(state);

        if self.owns_provider {
            self.provider.close()?;
        }
        info!(
            "event=persistence_close module=persistence status=ok table={} trace_id={}",
            self.config.table,
            ctx.trace_label()
        );
        Ok(())
    }

    /// Reads one page of records matching `query`.
    ///
    /// `paging.take` is clamped to `max_page_size`; OFFSET is applied only
    /// for non-negative skips. The total is computed with a second
    /// `COUNT(*)` only when `paging.total` is set.
    pub fn get_page_by_filter(
        &self,
        ctx: &OperationContext,
        query: &FilterQuery,
        paging: &PagingParams,
    ) -> PersistenceResult<DataPage<T>> {
        self.run(ctx, "get_page_by_filter", |conn, live| {
            let sql = SelectQuery::from_table(self.table_name.as_str())
                .projection(query.projection.as_deref())
                .filter(query.filter.as_deref())
                .sort(query.sort.as_deref())
                .page(paging.skip, paging.take, self.config.max_page_size)
                .to_sql();
            let items = self.query_records(conn, live, &sql, &[])?;

            let total = if paging.total {
                live.check()?;
                Some(self.count(conn, query.filter.as_deref())?)
            } else {
                None
            };
            Ok(DataPage::new(items, total))
        })
    }

    /// Reads every record matching `query`, without paging.
    pub fn get_list_by_filter(
        &self,
        ctx: &OperationContext,
        query: &FilterQuery,
    ) -> PersistenceResult<Vec<T>> {
        self.run(ctx, "get_list_by_filter", |conn, live| {
            let sql = SelectQuery::from_table(self.table_name.as_str())
                .projection(query.projection.as_deref())
                .filter(query.filter.as_deref())
                .sort(query.sort.as_deref())
                .to_sql();
            self.query_records(conn, live, &sql, &[])
        })
    }

    pub fn get_count_by_filter(
        &self,
        ctx: &OperationContext,
        filter: Option<&str>,
    ) -> PersistenceResult<i64> {
        self.run(ctx, "get_count_by_filter", |conn, _| self.count(conn, filter))
    }

    /// Reads one random record matching `filter`, or `None` when none match.
    pub fn get_one_random(
        &self,
        ctx: &OperationContext,
        filter: Option<&str>,
    ) -> PersistenceResult<Option<T>> {
        self.run(ctx, "get_one_random", |conn, live| {
            let count = self.count(conn, filter)?;
            if count == 0 {
                return Ok(None);
            }
            let position = rand::thread_rng().gen_range(0..count);
            let sql = SelectQuery::from_table(self.table_name.as_str())
                .filter(filter)
                .limit(1)
                .offset(Some(position))
                .to_sql();
            live.check()?;
            Ok(self.query_records(conn, live, &sql, &[])?.into_iter().next())
        })
    }

    pub fn get_one_by_id(&self, ctx: &OperationContext, id: &str) -> PersistenceResult<Option<T>> {
        self.run(ctx, "get_one_by_id", |conn, live| {
            self.read_by_id(conn, live, id)
        })
    }

    /// Reads records whose id is in `ids`. Unknown ids are skipped.
    pub fn get_list_by_ids<S: AsRef<str>>(
        &self,
        ctx: &OperationContext,
        ids: &[S],
    ) -> PersistenceResult<Vec<T>> {
        self.run(ctx, "get_list_by_ids", |conn, live| {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let filter = format!("{} IN ({})", self.id_column(), in_list(1, ids.len()));
            let sql = SelectQuery::from_table(self.table_name.as_str())
                .filter(Some(filter.as_str()))
                .to_sql();
            self.query_records(conn, live, &sql, &id_values(ids))
        })
    }

    /// Inserts `record`, assigning an id when it has none.
    ///
    /// Returns the input record (with its id) without re-reading it.
    pub fn create(&self, ctx: &OperationContext, mut record: T) -> PersistenceResult<T> {
        self.run(ctx, "create", |conn, _| {
            assign_id(&mut record);
            let columns = self.codec.from_record(&record)?;
            self.insert(conn, &columns)?;
            Ok(record)
        })
    }

    /// Inserts all `records` in one transaction.
    ///
    /// Either every record is stored or none is.
    pub fn create_batch(&self, ctx: &OperationContext, records: Vec<T>) -> PersistenceResult<Vec<T>> {
        self.run(ctx, "create_batch", |conn, live| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let mut created = Vec::with_capacity(records.len());
            for mut record in records {
                live.check()?;
                assign_id(&mut record);
                let columns = self.codec.from_record(&record)?;
                self.insert(&tx, &columns)?;
                created.push(record);
            }
            tx.commit()?;
            Ok(created)
        })
    }

    /// Replaces every mapped field of the stored record with `record`'s.
    ///
    /// Returns the re-read stored state, or `None` when no row has the id.
    pub fn update(&self, ctx: &OperationContext, record: &T) -> PersistenceResult<Option<T>> {
        self.run(ctx, "update", |conn, live| {
            let Some(id) = record.id().filter(|id| !id.is_empty()) else {
                return Ok(None);
            };
            let columns = self.codec.from_record(record)?;
            if self.update_columns(conn, id, &columns)? == 0 {
                return Ok(None);
            }
            self.read_by_id(conn, live, id)
        })
    }

    /// Inserts `record` or fully replaces the row with the same id.
    ///
    /// Uses a single `INSERT ... ON CONFLICT DO UPDATE` statement.
    pub fn set(&self, ctx: &OperationContext, mut record: T) -> PersistenceResult<T> {
        self.run(ctx, "set", |conn, live| {
            assign_id(&mut record);
            let columns = self.codec.from_record(&record)?;
            let keys = columns.keys().cloned().collect::<Vec<_>>();
            let assignments = upsert_assignments(&keys, self.codec.id_column());
            let conflict_action = if assignments.is_empty() {
                "NOTHING".to_string()
            } else {
                format!("UPDATE SET {assignments}")
            };
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO {conflict_action}",
                self.table_name,
                column_list(&keys),
                placeholders(keys.len()),
                self.id_column(),
            );
            let values = bind_values(&columns, &keys)?;
            conn.execute(&sql, params_from_iter(values))?;

            let stored = match record.id() {
                Some(id) => self.read_by_id(conn, live, id)?,
                None => None,
            };
            Ok(stored.unwrap_or(record))
        })
    }

    /// Updates only the fields present in `partial`.
    ///
    /// Flat layout: one SET clause over the supplied columns. Document
    /// layout: the configured `JsonMerge` patches the stored document.
    /// Returns the re-read stored state, or `None` when no row has the id.
    pub fn update_partial(
        &self,
        ctx: &OperationContext,
        id: &str,
        partial: &Map<String, Value>,
    ) -> PersistenceResult<Option<T>> {
        self.run(ctx, "update_partial", |conn, live| {
            if is_zero_id(Some(id)) {
                return Ok(None);
            }
            let columns = self.codec.from_partial(partial)?;
            let changed = match self.codec.layout() {
                StorageLayout::Flat => {
                    if columns.keys().all(|key| key == self.codec.id_column()) {
                        return self.read_by_id(conn, live, id);
                    }
                    self.update_columns(conn, id, &columns)?
                }
                StorageLayout::JsonDocument { data_column } => {
                    let patch = match columns.get(data_column) {
                        Some(Value::Object(patch)) => patch,
                        _ => {
                            return Err(PersistenceError::Conversion(format!(
                                "partial update must map `{data_column}` to an object"
                            )))
                        }
                    };
                    let target = JsonTarget {
                        table: &self.table_name,
                        id_column: self.codec.id_column(),
                        data_column,
                    };
                    self.merge.merge(conn, &target, id, patch)?
                }
            };
            if changed == 0 {
                return Ok(None);
            }
            self.read_by_id(conn, live, id)
        })
    }

    /// Deletes one record, returning its last stored state.
    pub fn delete_by_id(&self, ctx: &OperationContext, id: &str) -> PersistenceResult<Option<T>> {
        self.run(ctx, "delete_by_id", |conn, live| {
            let Some(existing) = self.read_by_id(conn, live, id)? else {
                return Ok(None);
            };
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?1",
                self.table_name,
                self.id_column()
            );
            conn.execute(&sql, [id])?;
            Ok(Some(existing))
        })
    }

    /// Deletes records by id; returns the number of rows removed.
    pub fn delete_by_ids<S: AsRef<str>>(
        &self,
        ctx: &OperationContext,
        ids: &[S],
    ) -> PersistenceResult<usize> {
        self.run(ctx, "delete_by_ids", |conn, _| {
            if ids.is_empty() {
                return Ok(0);
            }
            let filter = format!("{} IN ({})", self.id_column(), in_list(1, ids.len()));
            let sql = delete_sql(&self.table_name, Some(filter.as_str()));
            Ok(conn.execute(&sql, params_from_iter(id_values(ids)))?)
        })
    }

    /// Deletes records matching `filter`; returns the number removed.
    pub fn delete_by_filter(
        &self,
        ctx: &OperationContext,
        filter: Option<&str>,
    ) -> PersistenceResult<usize> {
        self.run(ctx, "delete_by_filter", |conn, _| {
            Ok(conn.execute(&delete_sql(&self.table_name, filter), [])?)
        })
    }

    /// Removes every row of the table.
    pub fn clear(&self, ctx: &OperationContext) -> PersistenceResult<()> {
        self.run(ctx, "clear", |conn, _| {
            conn.execute(&delete_sql(&self.table_name, None), [])?;
            Ok(())
        })
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release_owned_provider(&self) {
        if !self.owns_provider {
            return;
        }
        if let Err(err) = self.provider.close() {
            error!(
                "event=persistence_open module=persistence status=error table={} error_code=provider_close_failed error={}",
                self.config.table, err
            );
        }
    }

    fn id_column(&self) -> String {
        quote_identifier(self.codec.id_column())
    }

    /// Runs `body` against the live connection with logging and liveness.
    fn run<R>(
        &self,
        ctx: &OperationContext,
        operation: &'static str,
        body: impl FnOnce(&Connection, &Liveness<'_>) -> PersistenceResult<R>,
    ) -> PersistenceResult<R> {
        let started_at = Instant::now();
        let (conn, shutdown) = {
            let state = self.state();
            match state.connection.as_ref() {
                Some(conn) => (Arc::clone(conn), state.shutdown.clone()),
                None => {
                    return Err(PersistenceError::Connection(format!(
                        "persistence for table `{}` is not opened",
                        self.config.table
                    )))
                }
            }
        };
        let live = Liveness {
            ctx,
            shutdown: &shutdown,
            table: &self.config.table,
            operation,
        };

        let result = live.check().and_then(|()| {
            let guard = lock_connection(&conn);
            body(&*guard, &live)
        });

        match &result {
            Ok(_) => debug!(
                "event=persistence_op module=persistence status=ok table={} op={} trace_id={} duration_ms={}",
                self.config.table,
                operation,
                ctx.trace_label(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=persistence_op module=persistence status=error table={} op={} trace_id={} duration_ms={} error_code={} error={}",
                self.config.table,
                operation,
                ctx.trace_label(),
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }

    fn query_records(
        &self,
        conn: &Connection,
        live: &Liveness<'_>,
        sql: &str,
        params: &[SqlValue],
    ) -> PersistenceResult<Vec<T>> {
        let mut stmt = conn.prepare(sql)?;
        let columns = column_infos(&stmt);
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            live.check()?;
            records.push(self.codec.to_record(read_row(row, &columns)?)?);
        }
        Ok(records)
    }

    fn read_by_id(
        &self,
        conn: &Connection,
        live: &Liveness<'_>,
        id: &str,
    ) -> PersistenceResult<Option<T>> {
        let filter = format!("{} = ?1", self.id_column());
        let sql = SelectQuery::from_table(self.table_name.as_str())
            .filter(Some(filter.as_str()))
            .to_sql();
        let params = [SqlValue::Text(id.to_string())];
        Ok(self.query_records(conn, live, &sql, &params)?.into_iter().next())
    }

    fn count(&self, conn: &Connection, filter: Option<&str>) -> PersistenceResult<i64> {
        let count = conn.query_row(&count_sql(&self.table_name, filter), [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(count)
    }

    fn insert(&self, conn: &Connection, columns: &ColumnMap) -> PersistenceResult<usize> {
        let keys = columns.keys().cloned().collect::<Vec<_>>();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_name,
            column_list(&keys),
            placeholders(keys.len())
        );
        let values = bind_values(columns, &keys)?;
        Ok(conn.execute(&sql, params_from_iter(values))?)
    }

    /// `UPDATE ... SET <non-id columns> WHERE id = ?`; returns changed rows.
    fn update_columns(
        &self,
        conn: &Connection,
        id: &str,
        columns: &ColumnMap,
    ) -> PersistenceResult<usize> {
        let keys = columns.keys().cloned().collect::<Vec<_>>();
        let (clause, bound) = set_clause(&keys, self.codec.id_column());
        if bound.is_empty() {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                self.table_name,
                self.id_column()
            );
            let existing = conn.query_row(&sql, [id], |row| row.get::<_, i64>(0))?;
            return Ok(existing as usize);
        }
        let sql = format!(
            "UPDATE {} SET {clause} WHERE {} = ?{}",
            self.table_name,
            self.id_column(),
            bound.len() + 1
        );
        let mut values = bind_values(columns, &bound)?;
        values.push(SqlValue::Text(id.to_string()));
        Ok(conn.execute(&sql, params_from_iter(values))?)
    }
}

fn id_values<S: AsRef<str>>(ids: &[S]) -> Vec<SqlValue> {
    ids.iter()
        .map(|id| SqlValue::Text(id.as_ref().to_string()))
        .collect()
}
