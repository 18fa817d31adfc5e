//! Statement builders over `sqlx::QueryBuilder`

use sqlx::query_builder::Separated;
use sqlx::{Encode, QueryBuilder, Sqlite, Type};

use crate::Result;
use crate::pagination::validate_column_name;

/// Append ` IN (?, ?, ...)` to `builder`, binding each value.
pub fn push_in_list<'args, T, I>(builder: &mut QueryBuilder<'args, Sqlite>, values: I)
where
   I: IntoIterator<Item = T>,
   T: 'args + Encode<'args, Sqlite> + Type<Sqlite> + Send,
{
   builder.push(" IN (");
   let mut separated = builder.separated(", ");
   for value in values {
      separated.push_bind(value);
   }
   separated.push_unseparated(")");
}

/// Build `<head> IN (?, ...)<tail>` for one chunk of keys.
///
/// `head` ends with the column being matched, e.g.
/// `SELECT id FROM images WHERE id`. Callers are expected to have chunked
/// `values` with a [`crate::ChunkPolicy`].
pub fn in_list_query<'args, T, I>(head: &str, values: I, tail: &str) -> QueryBuilder<'args, Sqlite>
where
   I: IntoIterator<Item = T>,
   T: 'args + Encode<'args, Sqlite> + Type<Sqlite> + Send,
{
   let mut builder = QueryBuilder::new(head);
   push_in_list(&mut builder, values);
   builder.push(tail);
   builder
}

/// Conflict handling for a [`BulkInsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnConflict {
   /// Fail the statement (SQLite default).
   Abort,
   /// `INSERT OR IGNORE`: skip rows that collide with an existing key.
   Ignore,
   /// `INSERT OR REPLACE`: delete the colliding row, then insert.
   Replace,
   /// `ON CONFLICT (target) DO UPDATE SET ...`
   ///
   /// Each assignment is `(column, expression)`, for example
   /// `("file_size", "excluded.file_size")`.
   Update {
      target: Vec<String>,
      assignments: Vec<(String, String)>,
   },
}

/// Multi-row `INSERT` whose statements are sized by a [`crate::ChunkPolicy`].
///
/// Each row binds exactly one parameter per column, so the parameters per
/// row equal [`BulkInsert::params_per_row`].
#[derive(Debug, Clone)]
pub struct BulkInsert {
   table: String,
   columns: Vec<String>,
   on_conflict: OnConflict,
   returning: Vec<String>,
}

impl BulkInsert {
   pub fn new<I, S>(table: &str, columns: I) -> Result<Self>
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      validate_column_name(table)?;
      let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
      if columns.is_empty() {
         return Err(crate::Error::EmptyColumns);
      }
      for column in &columns {
         validate_column_name(column)?;
      }

      Ok(Self {
         table: table.to_string(),
         columns,
         on_conflict: OnConflict::Abort,
         returning: Vec::new(),
      })
   }

   pub fn on_conflict(mut self, on_conflict: OnConflict) -> Result<Self> {
      if let OnConflict::Update {
         target,
         assignments,
      } = &on_conflict
      {
         if target.is_empty() {
            return Err(crate::Error::EmptyColumns);
         }
         for column in target.iter().chain(assignments.iter().map(|(c, _)| c)) {
            validate_column_name(column)?;
         }
      }
      self.on_conflict = on_conflict;
      Ok(self)
   }

   /// Add a `RETURNING` clause listing `columns`.
   pub fn returning<I, S>(mut self, columns: I) -> Result<Self>
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
      for column in &columns {
         validate_column_name(column)?;
      }
      self.returning = columns;
      Ok(self)
   }

   pub fn params_per_row(&self) -> usize {
      self.columns.len()
   }

   /// Build the statement for one chunk of rows.
   ///
   /// `push_row` must bind exactly one value per column, in column order.
   pub fn build<'args, I, F>(&self, rows: I, push_row: F) -> QueryBuilder<'args, Sqlite>
   where
      I: IntoIterator,
      F: FnMut(Separated<'_, 'args, Sqlite, &'static str>, I::Item),
   {
      let verb = match self.on_conflict {
         OnConflict::Ignore => "INSERT OR IGNORE",
         OnConflict::Replace => "INSERT OR REPLACE",
         OnConflict::Abort | OnConflict::Update { .. } => "INSERT",
      };

      let mut builder = QueryBuilder::new(format!(
         "{} INTO {} ({}) ",
         verb,
         self.table,
         self.columns.join(", ")
      ));
      builder.push_values(rows, push_row);

      if let OnConflict::Update {
         target,
         assignments,
      } = &self.on_conflict
      {
         builder.push(format!(" ON CONFLICT ({}) ", target.join(", ")));
         if assignments.is_empty() {
            builder.push("DO NOTHING");
         } else {
            let set: Vec<String> = assignments
               .iter()
               .map(|(column, expr)| format!("{} = {}", column, expr))
               .collect();
            builder.push(format!("DO UPDATE SET {}", set.join(", ")));
         }
      }

      if !self.returning.is_empty() {
         builder.push(format!(" RETURNING {}", self.returning.join(", ")));
      }

      builder
   }
}
