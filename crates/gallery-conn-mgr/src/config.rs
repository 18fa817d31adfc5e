//! Pool settings

use std::time::Duration;

/// Sizing and timeouts for the pools of a [`crate::SqliteDatabase`].
///
/// The writer pool always holds exactly one connection; only the reader side
/// is sized here.
///
/// ```
/// use gallery_conn_mgr::SqliteDatabaseConfig;
/// use std::time::Duration;
///
/// let config = SqliteDatabaseConfig {
///     max_read_connections: 2,
///     busy_timeout: Duration::from_millis(250),
///     ..Default::default()
/// };
/// assert_eq!(config.idle_timeout, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct SqliteDatabaseConfig {
   /// Upper bound on open read-only connections. Values below 1 are raised
   /// to 1.
   ///
   /// Default: 6
   pub max_read_connections: u32,

   /// Pooled connections idle this long are closed and reopened on demand.
   /// Applies to readers and the writer alike.
   ///
   /// Default: 30 seconds
   pub idle_timeout: Duration,

   /// Wait on a locked database file before a statement fails with
   /// `SQLITE_BUSY`. Matters when another process has the file open.
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,
}

impl Default for SqliteDatabaseConfig {
   fn default() -> Self {
      Self {
         max_read_connections: 6,
         idle_timeout: Duration::from_secs(30),
         busy_timeout: Duration::from_secs(5),
      }
   }
}
