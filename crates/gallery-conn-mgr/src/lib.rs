//! # gallery-conn-mgr
//!
//! A minimal wrapper around SQLx that enforces the connection policy used by
//! the gallery store: one database file, many readers, one writer.
//!
//! ## Core Types
//!
//! - **[`SqliteDatabase`]**: Database handle with separate read and write connection pools
//! - **[`SqliteDatabaseConfig`]**: Configuration for connection pool settings
//! - **[`WriteGuard`]**: RAII guard ensuring exclusive write access
//! - **[`Error`]**: Error type for database operations
//!
//! ## Architecture
//!
//! - **Dual pools**: Separate read-only pool (default 6 connections) and write pool (max 1 connection)
//! - **Lazy WAL mode**: Write-Ahead Logging enabled automatically on first write
//! - **Exclusive writes**: Single-connection write pool enforces serialized write access
//! - **Closed state**: after [`SqliteDatabase::close`] every acquisition fails with
//!   [`Error::DatabaseClosed`]

mod config;
mod database;
mod error;
mod write_guard;

// Re-export public types
pub use config::SqliteDatabaseConfig;
pub use database::SqliteDatabase;
pub use error::{Error, Result};
pub use write_guard::WriteGuard;
