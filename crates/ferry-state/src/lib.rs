//! Persistence for ferry migrations.
//!
//! Provides the [`StateBackend`](backend::StateBackend) trait for entity and
//! tracker bookkeeping, the [`DestinationStore`](destination::DestinationStore)
//! contract for the destination persistence layer, and `SQLite`
//! implementations of both.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod destination;
pub mod error;
pub mod sqlite;
pub mod sqlite_destination;

pub use backend::StateBackend;
pub use destination::DestinationStore;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
pub use sqlite_destination::SqliteDestinationStore;
