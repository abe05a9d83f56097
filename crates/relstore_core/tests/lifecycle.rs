mod common;

use common::{flat_schema, open_flat, Dummy};
use relstore_core::{
    CancelSignal, ColumnMap, ConnectionConfig, ConnectionProvider, FilterQuery, FlatCodec,
    OperationContext, PersistenceBuilder, PersistenceConfig, PersistenceError, PersistenceResult,
    RecordCodec, SchemaManager, SharedConnection, SqliteConnectionProvider, StorageLayout,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Flat codec that trips a signal after decoding the first row.
struct CancelAfterFirstRow {
    signal: CancelSignal,
}

impl RecordCodec<Dummy> for CancelAfterFirstRow {
    fn layout(&self) -> StorageLayout<'_> {
        StorageLayout::Flat
    }

    fn to_record(&self, columns: ColumnMap) -> PersistenceResult<Dummy> {
        let record = RecordCodec::<Dummy>::to_record(&FlatCodec, columns)?;
        self.signal.cancel();
        Ok(record)
    }

    fn from_record(&self, record: &Dummy) -> PersistenceResult<ColumnMap> {
        FlatCodec.from_record(record)
    }

    fn from_partial(&self, partial: &Map<String, Value>) -> PersistenceResult<ColumnMap> {
        RecordCodec::<Dummy>::from_partial(&FlatCodec, partial)
    }
}

/// Flat codec that decodes slowly and reports when decoding started.
struct SlowDecode {
    started: Arc<AtomicBool>,
}

impl RecordCodec<Dummy> for SlowDecode {
    fn layout(&self) -> StorageLayout<'_> {
        StorageLayout::Flat
    }

    fn to_record(&self, columns: ColumnMap) -> PersistenceResult<Dummy> {
        self.started.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        RecordCodec::<Dummy>::to_record(&FlatCodec, columns)
    }

    fn from_record(&self, record: &Dummy) -> PersistenceResult<ColumnMap> {
        FlatCodec.from_record(record)
    }

    fn from_partial(&self, partial: &Map<String, Value>) -> PersistenceResult<ColumnMap> {
        RecordCodec::<Dummy>::from_partial(&FlatCodec, partial)
    }
}

/// Opens without error yet never reports itself open; counts closes.
#[derive(Default)]
struct NeverOpens {
    closes: AtomicUsize,
}

impl ConnectionProvider for NeverOpens {
    fn open(&self) -> PersistenceResult<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        false
    }

    fn connection(&self) -> Option<SharedConnection> {
        None
    }

    fn database_name(&self) -> String {
        "never".to_string()
    }

    fn close(&self) -> PersistenceResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Claims to be open but never hands out a connection.
struct HollowProvider;

impl ConnectionProvider for HollowProvider {
    fn open(&self) -> PersistenceResult<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn connection(&self) -> Option<SharedConnection> {
        None
    }

    fn database_name(&self) -> String {
        "hollow".to_string()
    }

    fn close(&self) -> PersistenceResult<()> {
        Ok(())
    }
}

#[test]
fn operations_on_closed_persistence_fail_with_connection_error() {
    let persistence = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("dummies"))
        .schema(flat_schema)
        .build()
        .unwrap();
    let ctx = OperationContext::new();

    let err = persistence.get_count_by_filter(&ctx, None).unwrap_err();
    assert!(matches!(err, PersistenceError::Connection(_)));

    persistence.open(&ctx).unwrap();
    persistence.create(&ctx, Dummy::new("A", "x")).unwrap();
    persistence.close(&ctx).unwrap();

    let err = persistence.get_one_by_id(&ctx, "anything").unwrap_err();
    assert!(matches!(err, PersistenceError::Connection(_)));
}

#[test]
fn open_and_close_are_idempotent() {
    let persistence = open_flat(PersistenceConfig::new("dummies"));
    let ctx = OperationContext::new();

    persistence.open(&ctx).unwrap();
    assert!(persistence.is_open());
    assert_eq!(persistence.database_name().as_deref(), Some("memory"));

    persistence.close(&ctx).unwrap();
    persistence.close(&ctx).unwrap();
    assert!(!persistence.is_open());
    assert!(persistence.database_name().is_none());
}

#[test]
fn reopening_existing_file_keeps_rows_and_skips_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite3");
    let config = PersistenceConfig::new("dummies").with_connection(ConnectionConfig::file(&path));
    let ctx = OperationContext::new();

    let first = open_flat(config.clone());
    let created = first.create(&ctx, Dummy::new("A", "persisted")).unwrap();
    assert_eq!(first.database_name().as_deref(), Some("store"));
    first.close(&ctx).unwrap();

    // A failing definition proves nothing runs against an existing table.
    let second = PersistenceBuilder::<Dummy>::flat(config)
        .schema(|schema: &mut SchemaManager| schema.ensure_schema("THIS IS NOT DDL"))
        .build()
        .unwrap();
    second.open(&ctx).unwrap();
    let loaded = second.get_one_by_id(&ctx, &created.id).unwrap().unwrap();
    assert_eq!(loaded.content, "persisted");
    second.close(&ctx).unwrap();
}

#[test]
fn injected_provider_is_shared_and_left_open() {
    let provider = Arc::new(SqliteConnectionProvider::open_in_memory().unwrap());
    let ctx = OperationContext::new();

    let first = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("dummies"))
        .schema(flat_schema)
        .provider(provider.clone())
        .build()
        .unwrap();
    let second = PersistenceBuilder::<Dummy>::json_document(PersistenceConfig::new("documents"))
        .schema(common::document_schema)
        .provider(provider.clone())
        .build()
        .unwrap();
    first.open(&ctx).unwrap();
    second.open(&ctx).unwrap();

    first.create(&ctx, Dummy::new("A", "flat")).unwrap();
    second.create(&ctx, Dummy::new("B", "document")).unwrap();

    first.close(&ctx).unwrap();
    assert!(provider.is_open());
    assert_eq!(second.get_count_by_filter(&ctx, None).unwrap(), 1);

    first.open(&ctx).unwrap();
    assert_eq!(first.get_count_by_filter(&ctx, None).unwrap(), 1);
}

#[test]
fn unopened_injected_provider_is_a_connection_error() {
    let provider = Arc::new(SqliteConnectionProvider::new(ConnectionConfig::in_memory()));
    let persistence = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("dummies"))
        .provider(provider.clone())
        .build()
        .unwrap();

    let err = persistence.open(&OperationContext::new()).unwrap_err();
    assert!(matches!(err, PersistenceError::Connection(_)));
    assert!(!provider.is_open());
    assert!(!persistence.is_open());
}

#[test]
fn owned_provider_that_fails_to_open_is_released() {
    let provider = Arc::new(NeverOpens::default());
    let persistence = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("dummies"))
        .owned_provider(provider.clone())
        .build()
        .unwrap();

    let err = persistence.open(&OperationContext::new()).unwrap_err();
    assert!(matches!(err, PersistenceError::Connection(_)));
    assert_eq!(provider.closes.load(Ordering::SeqCst), 1);
    assert!(!persistence.is_open());
}

#[test]
fn provider_without_connection_is_a_configuration_error() {
    let persistence = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("dummies"))
        .provider(Arc::new(HollowProvider))
        .build()
        .unwrap();

    let err = persistence.open(&OperationContext::new()).unwrap_err();
    assert!(matches!(err, PersistenceError::Configuration(_)));
}

#[test]
fn failing_bootstrap_leaves_persistence_closed() {
    let persistence = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("dummies"))
        .schema(|schema: &mut SchemaManager| {
            schema.ensure_schema("CREATE TABLE dummies (id TEXT PRIMARY KEY)");
            schema.ensure_schema("CREATE INDEX broken ON no_such_table (x)");
        })
        .build()
        .unwrap();

    let err = persistence.open(&OperationContext::new()).unwrap_err();
    match err {
        PersistenceError::SchemaBootstrap { table, source } => {
            assert_eq!(table, "dummies");
            assert!(matches!(*source, PersistenceError::Store(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!persistence.is_open());
}

#[test]
fn invalid_configuration_is_rejected_at_build() {
    let err = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("bad name;"))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, PersistenceError::Configuration(_)));

    let err = PersistenceBuilder::<Dummy>::flat(
        PersistenceConfig::new("dummies").with_max_page_size(0),
    )
    .build()
    .err()
    .unwrap();
    assert!(matches!(err, PersistenceError::Configuration(_)));
}

#[test]
fn json_configuration_drives_a_working_persistence() {
    let config =
        PersistenceConfig::from_json_str(r#"{"table": "dummies", "max_page_size": 2}"#).unwrap();
    let persistence = open_flat(config);
    let ctx = OperationContext::new();
    for key in ["A", "B", "C"] {
        persistence.create(&ctx, Dummy::new(key, "x")).unwrap();
    }

    let page = persistence
        .get_page_by_filter(&ctx, &FilterQuery::all(), &Default::default())
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, None);
}

#[test]
fn cancelled_context_terminates_before_any_statement() {
    let persistence = open_flat(PersistenceConfig::new("dummies"));
    let signal = CancelSignal::new();
    let ctx = OperationContext::new().with_cancel_signal(signal.clone());
    signal.cancel();

    let err = persistence.create(&ctx, Dummy::new("A", "x")).unwrap_err();
    match err {
        PersistenceError::OperationTerminated { table, operation } => {
            assert_eq!(table, "dummies");
            assert_eq!(operation, "create");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        persistence
            .get_count_by_filter(&OperationContext::new(), None)
            .unwrap(),
        0
    );
}

#[test]
fn cancellation_between_rows_aborts_iteration() {
    let signal = CancelSignal::new();
    let persistence = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("dummies"))
        .schema(flat_schema)
        .codec(CancelAfterFirstRow {
            signal: signal.clone(),
        })
        .build()
        .unwrap();
    let setup = OperationContext::new();
    persistence.open(&setup).unwrap();
    for key in ["A", "B", "C"] {
        persistence.create(&setup, Dummy::new(key, "x")).unwrap();
    }

    let ctx = OperationContext::new().with_cancel_signal(signal);
    let err = persistence
        .get_list_by_filter(&ctx, &FilterQuery::all())
        .unwrap_err();
    assert!(matches!(
        err,
        PersistenceError::OperationTerminated {
            operation: "get_list_by_filter",
            ..
        }
    ));
}

#[test]
fn concurrent_creates_share_one_connection() {
    let persistence = open_flat(PersistenceConfig::new("dummies"));

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let persistence = &persistence;
            scope.spawn(move || {
                let ctx = OperationContext::with_trace_id(format!("worker-{worker}"));
                for item in 0..10 {
                    persistence
                        .create(&ctx, Dummy::new(&format!("W{worker}-{item}"), "x"))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(
        persistence
            .get_count_by_filter(&OperationContext::new(), None)
            .unwrap(),
        40
    );
}

#[test]
fn close_aborts_an_operation_iterating_rows() {
    let started = Arc::new(AtomicBool::new(false));
    let persistence = PersistenceBuilder::<Dummy>::flat(PersistenceConfig::new("dummies"))
        .schema(flat_schema)
        .codec(SlowDecode {
            started: started.clone(),
        })
        .build()
        .unwrap();
    let ctx = OperationContext::new();
    persistence.open(&ctx).unwrap();
    for item in 0..10 {
        persistence
            .create(&ctx, Dummy::new(&format!("K{item}"), "x"))
            .unwrap();
    }

    let result = thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let reader_ctx = OperationContext::with_trace_id("reader");
            persistence.get_list_by_filter(&reader_ctx, &FilterQuery::all())
        });
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        persistence.close(&OperationContext::new()).unwrap();
        reader.join().unwrap()
    });

    match result {
        Err(PersistenceError::OperationTerminated { table, operation }) => {
            assert_eq!(table, "dummies");
            assert_eq!(operation, "get_list_by_filter");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(rows) => panic!("iteration finished with {} rows", rows.len()),
    }
    assert!(!persistence.is_open());
}
