//! # gallery-batch-toolkit
//!
//! Statement-level helpers shared by everything that talks to the gallery
//! database in bulk:
//!
//! - [`ChunkPolicy`]: splits key lists and row lists so no generated statement
//!   exceeds SQLite's bound-parameter limit
//! - [`in_list_query`] / [`push_in_list`]: `col IN (?, ?, ...)` statements over one chunk
//! - [`BulkInsert`]: multi-row `INSERT` statements with conflict handling
//! - [`pagination`]: keyset (cursor) pagination SQL

mod builders;
mod chunking;
mod error;
pub mod pagination;

pub use builders::{BulkInsert, OnConflict, in_list_query, push_in_list};
pub use chunking::{
   ChunkPolicy, DEFAULT_BOUND_PARAM_BUDGET, SQLITE_MAX_BOUND_PARAMS, unique_keys,
};
pub use error::{Error, Result};
pub use pagination::{KeysetColumn, KeysetQuery, SortDirection};
