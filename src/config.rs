//! Store configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use gallery_batch_toolkit::DEFAULT_BOUND_PARAM_BUDGET;
use gallery_conn_mgr::SqliteDatabaseConfig;

/// Configuration for a [`crate::GalleryStore`].
///
/// The database location is always explicit; there is no process-wide
/// default directory.
///
/// # Examples
///
/// ```
/// use nai_gallery_store::GalleryStoreConfig;
///
/// let config = GalleryStoreConfig {
///     cache_capacity: 500,
///     ..GalleryStoreConfig::new("/tmp/gallery/library.db")
/// };
/// assert_eq!(config.max_read_connections, 4);
/// ```
#[derive(Debug, Clone)]
pub struct GalleryStoreConfig {
   /// Path of the SQLite file. Missing parent directories are created.
   pub database_path: PathBuf,

   /// Size of the read connection pool.
   ///
   /// Default: 4
   pub max_read_connections: u32,

   /// Idle timeout for pooled connections.
   ///
   /// Default: 30 seconds
   pub idle_timeout: Duration,

   /// How long a statement waits for a database file locked by another
   /// process.
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,

   /// Maximum entries kept per in-memory cache (records and metadata are
   /// bounded separately).
   ///
   /// Default: 10 000
   pub cache_capacity: u64,

   /// Bound parameters one generated statement may use. Batch lookups and
   /// bulk inserts are split into chunks that stay within this budget.
   ///
   /// Default: 900
   pub max_bound_params: usize,

   /// Buffered change notifications per subscriber before it starts lagging.
   ///
   /// Default: 256
   pub change_channel_capacity: usize,
}

impl GalleryStoreConfig {
   pub fn new(database_path: impl AsRef<Path>) -> Self {
      Self {
         database_path: database_path.as_ref().to_path_buf(),
         max_read_connections: 4,
         idle_timeout: Duration::from_secs(30),
         busy_timeout: Duration::from_secs(5),
         cache_capacity: 10_000,
         max_bound_params: DEFAULT_BOUND_PARAM_BUDGET,
         change_channel_capacity: 256,
      }
   }

   pub(crate) fn pool_config(&self) -> SqliteDatabaseConfig {
      SqliteDatabaseConfig {
         max_read_connections: self.max_read_connections,
         idle_timeout: self.idle_timeout,
         busy_timeout: self.busy_timeout,
      }
   }
}
