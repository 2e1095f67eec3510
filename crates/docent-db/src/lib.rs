//! docent-db: SQLite storage for docent
//!
//! Holds the museum catalogue and ticket bookings behind the agent's
//! data-access capability, and persists conversation checkpoints so a
//! suspended booking survives a restart.

pub mod checkpoint_store;
pub mod connection;
pub mod data_access;
pub mod error;
pub mod fixtures;
pub mod migrations;

pub use checkpoint_store::SqliteCheckpointer;
pub use connection::{DbPool, connect, connect_with_settings, open};
pub use data_access::SqliteDataAccess;
pub use error::DbError;
pub use fixtures::seed_museums;
