#![allow(dead_code)]

use relstore_core::{
    Identifiable, IndexKey, IndexOptions, OperationContext, PersistenceBuilder, PersistenceConfig,
    SchemaManager, SqlitePersistence,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dummy {
    pub id: String,
    pub key: String,
    pub content: String,
    pub active: bool,
    pub rank: i64,
    pub tags: Vec<String>,
}

impl Dummy {
    pub fn new(key: &str, content: &str) -> Self {
        Self {
            key: key.to_string(),
            content: content.to_string(),
            ..Self::default()
        }
    }
}

impl Identifiable for Dummy {
    fn id(&self) -> Option<&str> {
        Some(self.id.as_str())
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

pub fn flat_schema(schema: &mut SchemaManager) {
    schema.ensure_schema(format!(
        "CREATE TABLE {} (
            id TEXT PRIMARY KEY,
            key TEXT NOT NULL,
            content TEXT,
            active BOOLEAN NOT NULL DEFAULT 0,
            rank INTEGER NOT NULL DEFAULT 0,
            tags JSON
        )",
        schema.qualified_table()
    ));
    let index_name = format!("{}_key", schema.table());
    schema.ensure_index(&index_name, &[IndexKey::asc("key")], IndexOptions::unique());
}

pub fn document_schema(schema: &mut SchemaManager) {
    schema.ensure_json_table("TEXT", "JSON");
    schema.ensure_generated_column("key", "TEXT", "$.key");
    let index_name = format!("{}_key", schema.table());
    schema.ensure_index(&index_name, &[IndexKey::asc("key")], IndexOptions::unique());
}

pub fn open_flat(config: PersistenceConfig) -> SqlitePersistence<Dummy> {
    let persistence = PersistenceBuilder::flat(config)
        .schema(flat_schema)
        .build()
        .unwrap();
    persistence.open(&OperationContext::new()).unwrap();
    persistence
}

pub fn open_document(config: PersistenceConfig) -> SqlitePersistence<Dummy> {
    let persistence = PersistenceBuilder::json_document(config)
        .schema(document_schema)
        .build()
        .unwrap();
    persistence.open(&OperationContext::new()).unwrap();
    persistence
}

pub fn patch(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}
