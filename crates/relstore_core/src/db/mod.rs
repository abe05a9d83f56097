//! SQLite connection bootstrap and provider contract.
//!
//! # Responsibility
//! - Open and configure SQLite connections.
//! - Expose connections to persistences through `ConnectionProvider`.
//!
//! # Invariants
//! - Persistences never open a connection behind their provider's back.

mod open;
mod provider;

pub use open::open_connection;
pub use provider::{
    lock_connection, ConnectionProvider, SharedConnection, SqliteConnectionProvider,
};
