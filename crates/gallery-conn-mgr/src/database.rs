//! SQLite database with connection pooling and exclusive write access

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, warn};

use crate::config::SqliteDatabaseConfig;
use crate::error::{Error, Result};
use crate::write_guard::WriteGuard;

/// SQLite database with connection pooling for concurrent reads and exclusive writes.
///
/// ## Architecture
///
/// The database maintains two connection pools:
/// - **`read_pool`**: Pool of query-only connections for concurrent reads
/// - **`write_conn`**: Single-connection pool for exclusive write access (enforced by max_connections=1)
///
/// ## State Management
///
/// - **`wal_initialized`**: Tracks whether WAL journal mode has been enabled (lazy initialization)
/// - **`closed`**: Prevents use after the database has been closed
/// - **`path`**: Database file path for cleanup operations
///
/// ## Usage Pattern
///
/// ```text
/// 1. Connect to database (creates the file and both pools)
/// 2. Read operations: Access read_pool for concurrent reads
/// 3. Write operations: Acquire writer (lazily enables WAL on first call)
/// 4. Close database when done
/// ```
#[derive(Debug)]
pub struct SqliteDatabase {
   /// Pool of query-only connections (defaults to max_connections=6) for concurrent reads
   read_pool: Pool<Sqlite>,

   /// Single read-write connection pool (max_connections=1) for serialized writes
   write_conn: Pool<Sqlite>,

   /// Tracks if WAL mode has been initialized (set on first write)
   wal_initialized: AtomicBool,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,

   /// Path to database file (used for cleanup)
   path: PathBuf,
}

impl SqliteDatabase {
   /// Open (creating if missing) the database file at `path`.
   ///
   /// The parent directory is created when it does not exist. The write pool
   /// connects eagerly so an unwritable location fails here rather than on
   /// the first write; the read pool connects lazily.
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Arc<Self>> {
      let path = path.as_ref().to_path_buf();
      let config = custom_config.unwrap_or_default();

      if let Some(parent) = path.parent()
         && !parent.as_os_str().is_empty()
      {
         tokio::fs::create_dir_all(parent).await?;
      }

      let base_options = SqliteConnectOptions::new()
         .filename(&path)
         .busy_timeout(config.busy_timeout)
         .foreign_keys(true);

      let write_conn = SqlitePoolOptions::new()
         .max_connections(1)
         .min_connections(0)
         .idle_timeout(config.idle_timeout)
         .connect_with(base_options.clone().create_if_missing(true))
         .await?;

      // Readers open the file read-write so they can map the WAL index, but
      // refuse to modify anything.
      let read_pool = SqlitePoolOptions::new()
         .max_connections(config.max_read_connections.max(1))
         .min_connections(0)
         .idle_timeout(config.idle_timeout)
         .connect_lazy_with(base_options.pragma("query_only", Cow::Borrowed("ON")));

      debug!(
         path = %path.display(),
         max_read_connections = config.max_read_connections,
         "Opened SQLite database"
      );

      Ok(Arc::new(Self {
         read_pool,
         write_conn,
         wal_initialized: AtomicBool::new(false),
         closed: AtomicBool::new(false),
         path,
      }))
   }

   /// Get a reference to the read-only connection pool.
   pub fn read_pool(&self) -> Result<&Pool<Sqlite>> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }
      Ok(&self.read_pool)
   }

   /// Acquire exclusive access to the write connection.
   ///
   /// Waits until any other writer releases its guard. The first acquisition
   /// switches the database to WAL journal mode so readers are not blocked by
   /// the writer.
   pub async fn acquire_writer(&self) -> Result<WriteGuard> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }

      let mut conn = self.write_conn.acquire().await?;

      if !self.wal_initialized.load(Ordering::Acquire) {
         sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
         self.wal_initialized.store(true, Ordering::Release);
         debug!(path = %self.path.display(), "Enabled WAL journal mode");
      }

      Ok(WriteGuard::new(conn))
   }

   /// Path of the database file.
   pub fn path(&self) -> &Path {
      &self.path
   }

   /// Whether [`close`](Self::close) has been called.
   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   /// Close both pools. Later acquisitions fail with [`Error::DatabaseClosed`].
   ///
   /// Closing twice is allowed and does nothing the second time.
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::AcqRel) {
         return Ok(());
      }

      self.read_pool.close().await;
      self.write_conn.close().await;
      debug!(path = %self.path.display(), "Closed SQLite database");
      Ok(())
   }

   /// Close the database and delete its file together with the WAL and
   /// shared-memory side files.
   pub async fn remove(&self) -> Result<()> {
      self.close().await?;

      for suffix in ["", "-wal", "-shm"] {
         let mut file = self.path.clone().into_os_string();
         file.push(suffix);
         match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
               warn!(file = ?file, error = %e, "Failed to remove database file");
               return Err(e.into());
            }
         }
      }

      Ok(())
   }
}
