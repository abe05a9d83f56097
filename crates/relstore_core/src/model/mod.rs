//! Engine-facing data model.
//!
//! # Responsibility
//! - Define the identity capability every stored record exposes.
//! - Define paging inputs/outputs and the per-call execution context.
//!
//! # Invariants
//! - Record types stay opaque to the engine beyond `Identifiable`.

pub mod context;
pub mod identity;
pub mod paging;
