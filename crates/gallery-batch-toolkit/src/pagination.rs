//! Keyset pagination SQL generation.
//!
//! Instead of skipping rows with OFFSET, keyset pagination uses indexed column
//! values from the last row of the previous page to seek directly to the next
//! one. Query cost stays constant however deep the caller pages.
//!
//! # Example
//!
//! ```
//! use gallery_batch_toolkit::pagination::{KeysetColumn, KeysetQuery};
//!
//! let keyset = vec![KeysetColumn::desc("modified_at"), KeysetColumn::desc("id")];
//! let query = KeysetQuery::build(
//!    "SELECT id, modified_at FROM images",
//!    Some("is_deleted = 0"),
//!    &keyset,
//!    Some(2),
//!    50,
//! )
//! .unwrap();
//!
//! assert_eq!(
//!    query.sql,
//!    r#"SELECT id, modified_at FROM images WHERE is_deleted = 0 AND (("modified_at", "id") < (?, ?)) ORDER BY "modified_at" DESC, "id" DESC LIMIT 51"#
//! );
//! ```

use serde::{Deserialize, Serialize};

use crate::Error;

/// Sort direction for a keyset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
   /// Ascending order (smallest first)
   Asc,
   /// Descending order (largest first)
   Desc,
}

/// A column in the keyset used for cursor-based pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysetColumn {
   /// Column name as it appears in the query result set
   pub name: String,
   /// Sort direction for this column
   pub direction: SortDirection,
}

impl KeysetColumn {
   /// Create a keyset column with ascending sort direction.
   pub fn asc(name: impl Into<String>) -> Self {
      Self {
         name: name.into(),
         direction: SortDirection::Asc,
      }
   }

   /// Create a keyset column with descending sort direction.
   pub fn desc(name: impl Into<String>) -> Self {
      Self {
         name: name.into(),
         direction: SortDirection::Desc,
      }
   }
}

/// Validate that an identifier is safe for SQL interpolation.
///
/// Accepts names matching `[a-zA-Z_][a-zA-Z0-9_.]*`, which covers plain column
/// names, qualified names (e.g., `table.column`), and underscored identifiers.
pub(crate) fn validate_column_name(name: &str) -> Result<(), Error> {
   let invalid = || Error::InvalidColumnName {
      name: name.to_string(),
   };

   let mut chars = name.chars();
   match chars.next() {
      Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
      _ => return Err(invalid()),
   }

   if chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.') {
      Ok(())
   } else {
      Err(invalid())
   }
}

/// Quote an identifier with double quotes, doubling any embedded quote.
pub(crate) fn quote_identifier(name: &str) -> String {
   format!("\"{}\"", name.replace('"', "\"\""))
}

/// A generated page query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetQuery {
   /// Final SQL with positional `?` placeholders for the cursor.
   pub sql: String,
   /// Cursor value index to bind for each placeholder, in placeholder order.
   ///
   /// Mixed-direction keysets repeat leading cursor values, so this can be
   /// longer than the cursor itself.
   pub cursor_binds: Vec<usize>,
   /// Rows the query fetches: one more than the page size, so the caller
   /// can tell whether another page follows.
   pub limit: usize,
}

impl KeysetQuery {
   /// Build the query for one page.
   ///
   /// `select_from` is the `SELECT ... FROM ...` part without any WHERE,
   /// ORDER BY or LIMIT. `filter` is an optional condition ANDed with the
   /// cursor condition. `cursor_len` is `Some(n)` when continuing from a
   /// cursor of `n` values and `None` for the first page.
   pub fn build(
      select_from: &str,
      filter: Option<&str>,
      keyset: &[KeysetColumn],
      cursor_len: Option<usize>,
      page_size: usize,
   ) -> Result<Self, Error> {
      if keyset.is_empty() {
         return Err(Error::EmptyKeysetColumns);
      }
      if page_size == 0 {
         return Err(Error::InvalidPageSize);
      }
      for col in keyset {
         validate_column_name(&col.name)?;
      }

      let mut conditions: Vec<String> = filter.map(str::to_string).into_iter().collect();
      let mut cursor_binds = Vec::new();

      if let Some(len) = cursor_len {
         if len != keyset.len() {
            return Err(Error::CursorLengthMismatch {
               cursor_len: len,
               keyset_len: keyset.len(),
            });
         }
         let (condition, binds) = build_cursor_condition(keyset);
         conditions.push(format!("({})", condition));
         cursor_binds = binds;
      }

      let mut sql = select_from.trim_end().trim_end_matches(';').to_string();
      if !conditions.is_empty() {
         sql = format!("{} WHERE {}", sql, conditions.join(" AND "));
      }

      let limit = page_size.checked_add(1).ok_or(Error::InvalidPageSize)?;
      sql = format!("{} {} LIMIT {}", sql, build_order_by(keyset), limit);

      Ok(Self {
         sql,
         cursor_binds,
         limit,
      })
   }
}

/// Trim a fetched page to `page_size` rows and report whether more follow.
pub fn split_page<T>(mut rows: Vec<T>, page_size: usize) -> (Vec<T>, bool) {
   let has_more = rows.len() > page_size;
   rows.truncate(page_size);
   (rows, has_more)
}

/// Build the cursor condition for seeking past the previous page.
///
/// For uniform direction (all ASC or all DESC), uses row-value comparison:
/// `("a", "b") > (?, ?)`.
///
/// For mixed directions, uses expanded OR form:
/// `("a" > ?) OR ("a" = ? AND "b" < ?)`.
///
/// Returns the SQL fragment and, per placeholder, the cursor index to bind.
pub(crate) fn build_cursor_condition(keyset: &[KeysetColumn]) -> (String, Vec<usize>) {
   let all_asc = keyset.iter().all(|k| k.direction == SortDirection::Asc);
   let all_desc = keyset.iter().all(|k| k.direction == SortDirection::Desc);

   if all_asc || all_desc {
      let cols: Vec<String> = keyset.iter().map(|k| quote_identifier(&k.name)).collect();
      let placeholders = vec!["?"; keyset.len()].join(", ");
      let op = if all_asc { ">" } else { "<" };
      let sql = format!("({}) {} ({})", cols.join(", "), op, placeholders);
      return (sql, (0..keyset.len()).collect());
   }

   let mut clauses = Vec::new();
   let mut binds = Vec::new();

   for (level, column) in keyset.iter().enumerate() {
      let mut parts: Vec<String> = keyset[..level]
         .iter()
         .map(|k| format!("{} = ?", quote_identifier(&k.name)))
         .collect();
      binds.extend(0..level);

      let op = match column.direction {
         SortDirection::Asc => ">",
         SortDirection::Desc => "<",
      };
      parts.push(format!("{} {} ?", quote_identifier(&column.name), op));
      binds.push(level);

      clauses.push(format!("({})", parts.join(" AND ")));
   }

   (clauses.join(" OR "), binds)
}

/// Build the ORDER BY clause from the keyset definition.
pub(crate) fn build_order_by(keyset: &[KeysetColumn]) -> String {
   let parts: Vec<String> = keyset
      .iter()
      .map(|k| {
         let dir = match k.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
         };
         format!("{} {}", quote_identifier(&k.name), dir)
      })
      .collect();

   format!("ORDER BY {}", parts.join(", "))
}
