//! Bound-parameter chunking.
//!
//! SQLite refuses statements that bind more host parameters than
//! `SQLITE_MAX_VARIABLE_NUMBER` (999 on builds before 3.32, and still the
//! value many platform builds ship). Batch operations therefore split their
//! key or row lists so every generated statement stays below a fixed budget.

use std::hash::Hash;
use std::slice::Chunks;

use indexmap::IndexSet;
use tracing::trace;

use crate::{Error, Result};

/// Hard limit on bound parameters per statement assumed for every SQLite build.
pub const SQLITE_MAX_BOUND_PARAMS: usize = 999;

/// Parameters a single generated statement may bind by default, leaving a
/// margin under [`SQLITE_MAX_BOUND_PARAMS`].
pub const DEFAULT_BOUND_PARAM_BUDGET: usize = 900;

/// How many bound parameters one generated statement may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
   budget: usize,
}

impl ChunkPolicy {
   /// Create a policy with an explicit per-statement budget.
   ///
   /// The budget must be in `1..=SQLITE_MAX_BOUND_PARAMS`.
   pub fn new(budget: usize) -> Result<Self> {
      if budget == 0 || budget > SQLITE_MAX_BOUND_PARAMS {
         return Err(Error::InvalidBoundParamLimit {
            budget,
            max: SQLITE_MAX_BOUND_PARAMS,
         });
      }
      Ok(Self { budget })
   }

   /// Per-statement parameter budget.
   pub fn budget(&self) -> usize {
      self.budget
   }

   /// Rows (or keys) that fit in one statement when each binds
   /// `params_per_row` parameters.
   pub fn rows_per_statement(&self, params_per_row: usize) -> Result<usize> {
      if params_per_row == 0 {
         return Err(Error::EmptyColumns);
      }
      if params_per_row > self.budget {
         return Err(Error::RowTooWide {
            params_per_row,
            budget: self.budget,
         });
      }
      Ok(self.budget / params_per_row)
   }

   /// Split `items` into statement-sized chunks.
   pub fn chunks<'a, T>(&self, items: &'a [T], params_per_row: usize) -> Result<Chunks<'a, T>> {
      let rows_per_statement = self.rows_per_statement(params_per_row)?;
      trace!(
         items = items.len(),
         rows_per_statement,
         statements = items.len().div_ceil(rows_per_statement),
         "Chunking batch"
      );
      Ok(items.chunks(rows_per_statement))
   }

   /// Number of statements needed for `rows` rows. Zero rows need zero statements.
   pub fn statements_needed(&self, rows: usize, params_per_row: usize) -> Result<usize> {
      Ok(rows.div_ceil(self.rows_per_statement(params_per_row)?))
   }
}

impl Default for ChunkPolicy {
   fn default() -> Self {
      Self {
         budget: DEFAULT_BOUND_PARAM_BUDGET,
      }
   }
}

/// Drop repeated keys, keeping the first occurrence of each in order.
pub fn unique_keys<K, I>(keys: I) -> Vec<K>
where
   K: Hash + Eq,
   I: IntoIterator<Item = K>,
{
   keys.into_iter().collect::<IndexSet<K>>().into_iter().collect()
}
