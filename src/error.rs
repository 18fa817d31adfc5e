use std::path::PathBuf;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Underlying cause of a storage failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageFailure {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error applying the embedded schema migrations.
   #[error(transparent)]
   Migrate(#[from] sqlx::migrate::MigrateError),

   /// Error from the connection manager.
   #[error(transparent)]
   ConnectionManager(#[from] gallery_conn_mgr::Error),

   /// Error building a chunked statement.
   #[error(transparent)]
   Toolkit(#[from] gallery_batch_toolkit::Error),
}

impl StorageFailure {
   fn is_pool_closed(&self) -> bool {
      match self {
         StorageFailure::Sqlx(sqlx::Error::PoolClosed) => true,
         StorageFailure::ConnectionManager(e) => e.is_closed(),
         StorageFailure::Migrate(sqlx::migrate::MigrateError::Execute(sqlx::Error::PoolClosed)) => {
            true
         }
         _ => false,
      }
   }
}

/// Error types for gallery store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The database file could not be opened, created or migrated.
   #[error("library unavailable at {}: {source}", path.display())]
   StorageInit {
      path: PathBuf,
      #[source]
      source: StorageFailure,
   },

   /// A read or batch read failed. No partial results are returned.
   #[error("storage query failed: {0}")]
   StorageQuery(#[source] StorageFailure),

   /// A write failed and was rolled back. The cache was left untouched.
   #[error("storage mutation failed: {0}")]
   StorageMutation(#[source] StorageFailure),

   /// The store was closed before the operation ran.
   #[error("connection pool has been closed")]
   PoolClosed,

   /// A cancellable mutation was cancelled and rolled back before commit.
   #[error("operation cancelled before commit")]
   Cancelled,

   /// Tag text was empty after normalization.
   #[error("invalid tag: {0:?}")]
   InvalidTag(String),

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Page size or cursor rejected by the listing query.
   #[error("invalid pagination request: {0}")]
   InvalidPagination(#[source] gallery_batch_toolkit::Error),
}

impl Error {
   /// Wrap a failure raised while reading.
   pub(crate) fn query(err: impl Into<StorageFailure>) -> Self {
      let failure = err.into();
      if failure.is_pool_closed() {
         Error::PoolClosed
      } else {
         Error::StorageQuery(failure)
      }
   }

   /// Wrap a failure raised while writing.
   pub(crate) fn mutation(err: impl Into<StorageFailure>) -> Self {
      let failure = err.into();
      if failure.is_pool_closed() {
         Error::PoolClosed
      } else {
         Error::StorageMutation(failure)
      }
   }

   /// True for failures of read operations, which callers usually show as an
   /// empty or unknown state.
   pub fn is_read_failure(&self) -> bool {
      matches!(self, Error::StorageQuery(_) | Error::InvalidPagination(_))
   }

   /// True for failures of write operations, which callers usually offer to
   /// retry.
   pub fn is_write_failure(&self) -> bool {
      matches!(
         self,
         Error::StorageMutation(_) | Error::TransactionRollbackFailed { .. } | Error::Cancelled
      )
   }

   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::StorageInit { .. } => "STORAGE_INIT".to_string(),
         Error::StorageQuery(_) => "STORAGE_QUERY".to_string(),
         Error::StorageMutation(_) => "STORAGE_MUTATION".to_string(),
         Error::PoolClosed => "POOL_CLOSED".to_string(),
         Error::Cancelled => "CANCELLED".to_string(),
         Error::InvalidTag(_) => "INVALID_TAG".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
         Error::InvalidPagination(e) => e.error_code(),
      }
   }
}
