/// Result type alias for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for statement building and chunking.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Bound-parameter budget outside `1..=SQLITE_MAX_BOUND_PARAMS`.
   #[error("bound parameter budget {budget} must be between 1 and {max}")]
   InvalidBoundParamLimit { budget: usize, max: usize },

   /// A statement needs at least one bound column per row.
   #[error("statement requires at least one column")]
   EmptyColumns,

   /// A single row needs more parameters than one statement may bind.
   #[error("a row binds {params_per_row} parameters but the budget is {budget}")]
   RowTooWide {
      params_per_row: usize,
      budget: usize,
   },

   /// Column or table name contains invalid characters.
   ///
   /// Names must match `[a-zA-Z_][a-zA-Z0-9_.]*` (letters, digits,
   /// underscores, and dots for qualified names like `table.column`).
   #[error("invalid identifier '{name}': must match [a-zA-Z_][a-zA-Z0-9_.]*")]
   InvalidColumnName { name: String },

   /// Keyset pagination requires at least one column.
   #[error("keyset pagination requires at least one column")]
   EmptyKeysetColumns,

   /// Page size must be greater than zero.
   #[error("page size must be greater than zero")]
   InvalidPageSize,

   /// Cursor length does not match keyset column count.
   #[error("cursor has {cursor_len} values but keyset has {keyset_len} columns")]
   CursorLengthMismatch {
      cursor_len: usize,
      keyset_len: usize,
   },
}

impl Error {
   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::InvalidBoundParamLimit { .. } => "INVALID_BOUND_PARAM_LIMIT".to_string(),
         Error::EmptyColumns => "EMPTY_COLUMNS".to_string(),
         Error::RowTooWide { .. } => "ROW_TOO_WIDE".to_string(),
         Error::InvalidColumnName { .. } => "INVALID_COLUMN_NAME".to_string(),
         Error::EmptyKeysetColumns => "EMPTY_KEYSET_COLUMNS".to_string(),
         Error::InvalidPageSize => "INVALID_PAGE_SIZE".to_string(),
         Error::CursorLengthMismatch { .. } => "CURSOR_LENGTH_MISMATCH".to_string(),
      }
   }
}
