//! Partial-update merge strategies for the JSON-document layout.
//!
//! # Responsibility
//! - Apply an RFC 7396 merge-patch to one stored document.
//! - Isolate the single store-specific operator (`json_patch`) behind a
//!   replaceable hook.
//!
//! # Invariants
//! - Merges touch at most one row, addressed by id.
//! - A missing row is reported as `0` affected rows, never an error.

use crate::error::{PersistenceError, PersistenceResult};
use crate::query::quote_identifier;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::{Map, Value};

/// Location of the document being patched.
#[derive(Debug, Clone, Copy)]
pub struct JsonTarget<'a> {
    /// Quoted, possibly schema-qualified table name.
    pub table: &'a str,
    pub id_column: &'a str,
    pub data_column: &'a str,
}

/// Hook applying a merge-patch to one stored document.
pub trait JsonMerge: Send + Sync {
    /// Returns the number of affected rows.
    fn merge(
        &self,
        conn: &Connection,
        target: &JsonTarget<'_>,
        id: &str,
        patch: &Map<String, Value>,
    ) -> PersistenceResult<usize>;
}

/// Uses SQLite's native `json_patch()` in a single UPDATE.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeJsonPatch;

impl JsonMerge for NativeJsonPatch {
    fn merge(
        &self,
        conn: &Connection,
        target: &JsonTarget<'_>,
        id: &str,
        patch: &Map<String, Value>,
    ) -> PersistenceResult<usize> {
        let data = quote_identifier(target.data_column);
        let sql = format!(
            "UPDATE {} SET {data} = json_patch({data}, ?1) WHERE {} = ?2",
            target.table,
            quote_identifier(target.id_column),
        );
        let patch_text = serde_json::to_string(patch)?;
        Ok(conn.execute(&sql, params![patch_text, id])?)
    }
}

/// Reads the document, merges in process, writes it back.
///
/// For stores without a native JSON patch operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadModifyWrite;

impl JsonMerge for ReadModifyWrite {
    fn merge(
        &self,
        conn: &Connection,
        target: &JsonTarget<'_>,
        id: &str,
        patch: &Map<String, Value>,
    ) -> PersistenceResult<usize> {
        let data = quote_identifier(target.data_column);
        let id_column = quote_identifier(target.id_column);
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row(
                &format!("SELECT {data} FROM {} WHERE {id_column} = ?1", target.table),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(0);
        };

        let mut document: Value = serde_json::from_str(&current).map_err(|err| {
            PersistenceError::Conversion(format!("stored document `{id}` is malformed: {err}"))
        })?;
        merge_patch(&mut document, &Value::Object(patch.clone()));

        let changed = tx.execute(
            &format!(
                "UPDATE {} SET {data} = ?1 WHERE {id_column} = ?2",
                target.table
            ),
            params![serde_json::to_string(&document)?, id],
        )?;
        tx.commit()?;
        Ok(changed)
    }
}

/// Applies an RFC 7396 merge-patch in place.
///
/// `null` members remove keys; objects merge recursively; anything else
/// replaces the target.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_fields) = target {
        for (key, value) in patch_fields {
            if value.is_null() {
                target_fields.remove(key);
            } else {
                merge_patch(
                    target_fields.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::merge_patch;
    use serde_json::json;

    #[test]
    fn merge_patch_follows_rfc_7396() {
        let mut doc = json!({"a": "b", "c": {"d": "e", "f": "g"}, "keep": 1});
        merge_patch(&mut doc, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(doc, json!({"a": "z", "c": {"d": "e"}, "keep": 1}));
    }

    #[test]
    fn merge_patch_replaces_non_objects() {
        let mut doc = json!({"list": [1, 2]});
        merge_patch(&mut doc, &json!({"list": [3], "new": {"x": 1}}));
        assert_eq!(doc, json!({"list": [3], "new": {"x": 1}}));

        let mut scalar = json!("text");
        merge_patch(&mut scalar, &json!({"a": 1}));
        assert_eq!(scalar, json!({"a": 1}));
    }
}
