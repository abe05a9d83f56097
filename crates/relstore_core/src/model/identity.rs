//! Record identity capability and id assignment.
//!
//! # Responsibility
//! - Define how the engine reads and writes a record's string id.
//! - Generate ids for records created without one.
//!
//! # Invariants
//! - `None` and `Some("")` are both the zero id.
//! - Generated ids are 32 lowercase hex chars (128 random bits).
//! - Ids are never checked against the store; uniqueness relies on entropy
//!   plus an optional unique index.

use serde_json::{Map, Value};
use uuid::Uuid;

/// Field/column holding the record id.
pub const ID_FIELD: &str = "id";

/// Identity capability for records handled by a persistence instance.
pub trait Identifiable {
    /// Current id, or `None` when unset.
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);
}

/// Map-shaped records keep their identity in the `"id"` key.
impl Identifiable for Map<String, Value> {
    fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(Value::as_str)
    }

    fn set_id(&mut self, id: String) {
        self.insert(ID_FIELD.to_string(), Value::String(id));
    }
}

/// Generates a collision-resistant random id.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns whether `id` is the zero value.
pub fn is_zero_id(id: Option<&str>) -> bool {
    id.map_or(true, str::is_empty)
}

/// Assigns a fresh id when the record has none.
///
/// Returns `true` when an id was generated.
pub fn assign_id<T: Identifiable + ?Sized>(record: &mut T) -> bool {
    if !is_zero_id(record.id()) {
        return false;
    }
    record.set_id(generate_id());
    true
}
