use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gallery_batch_toolkit::ChunkPolicy;
use gallery_conn_mgr::{SqliteDatabase, WriteGuard};
use sqlx::{Pool, Sqlite};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::ImageCache;
use crate::changes::{ChangeBroker, ChangeKind, GalleryChange, GalleryChangeStream};
use crate::config::GalleryStoreConfig;
use crate::error::StorageFailure;
use crate::schema;
use crate::{Error, Result};

/// Local image library: SQLite persistence behind a write-through memory cache.
///
/// Reads run on a pool of read-only connections and go through the cache.
/// Writes are serialized through a single writer connection, and each one
/// evicts the cache entries of every image it touched after it commits and
/// before it returns.
///
/// Mutations run on their own task. Dropping a mutation future (a timeout,
/// a `select!` losing branch) does not abandon it halfway: the write either
/// never reached the database or it commits and its cache eviction and change
/// notification still happen.
///
/// `GalleryStore` is `Send + Sync`; share it behind an `Arc` between tasks.
pub struct GalleryStore {
   pub(crate) state: Arc<StoreState>,
}

/// Everything a detached mutation needs to outlive its caller.
pub(crate) struct StoreState {
   pub(crate) db: Arc<SqliteDatabase>,
   pub(crate) cache: ImageCache,
   pub(crate) changes: ChangeBroker,
   pub(crate) chunk_policy: ChunkPolicy,
   statements: AtomicU64,
   #[cfg(test)]
   pub(crate) on_statement: parking_lot::Mutex<Option<Box<dyn FnMut(u64) + Send>>>,
}

impl GalleryStore {
   /// Open (creating if needed) the library at `config.database_path` and
   /// bring its schema up to date.
   ///
   /// Opening an existing, current library leaves its data untouched. Any
   /// failure is reported as [`Error::StorageInit`].
   pub async fn open(config: GalleryStoreConfig) -> Result<Self> {
      let init_error = |source: StorageFailure| Error::StorageInit {
         path: config.database_path.clone(),
         source,
      };

      let chunk_policy =
         ChunkPolicy::new(config.max_bound_params).map_err(|e| init_error(e.into()))?;

      let db = SqliteDatabase::connect(&config.database_path, Some(config.pool_config()))
         .await
         .map_err(|e| init_error(e.into()))?;

      if let Err(source) = schema::migrate(&db).await {
         if let Err(close_err) = db.close().await {
            warn!(error = %close_err, "Failed to close database after migration error");
         }
         return Err(init_error(source));
      }

      debug!(
         path = %config.database_path.display(),
         schema_version = schema::latest_version(),
         "Gallery store opened"
      );

      Ok(Self {
         state: Arc::new(StoreState {
            db,
            cache: ImageCache::new(config.cache_capacity),
            changes: ChangeBroker::new(config.change_channel_capacity),
            chunk_policy,
            statements: AtomicU64::new(0),
            #[cfg(test)]
            on_statement: parking_lot::Mutex::new(None),
         }),
      })
   }

   /// Close both pools and drop the cache. Idempotent.
   ///
   /// Every later operation fails with [`Error::PoolClosed`].
   pub async fn close(&self) -> Result<()> {
      self.state.cache.clear();
      self.state.db.close().await.map_err(Error::mutation)?;
      debug!(path = %self.path().display(), "Gallery store closed");
      Ok(())
   }

   /// Close the store and delete the database file with its WAL and SHM
   /// companions.
   pub async fn remove(self) -> Result<()> {
      self.state.cache.clear();
      self.state.db.remove().await.map_err(Error::mutation)?;
      debug!(path = %self.path().display(), "Gallery store removed");
      Ok(())
   }

   pub fn path(&self) -> &Path {
      self.state.db.path()
   }

   pub fn is_closed(&self) -> bool {
      self.state.db.is_closed()
   }

   /// Newest schema version this build migrates to.
   pub fn schema_version(&self) -> i64 {
      schema::latest_version()
   }

   /// Data statements sent to SQLite since the store was opened.
   ///
   /// Transaction control (`BEGIN`, `COMMIT`, `ROLLBACK`) is not counted.
   /// Useful to observe chunking and cache hits.
   pub fn statements_executed(&self) -> u64 {
      self.state.statements.load(Ordering::Relaxed)
   }

   /// Approximate number of cached entries. Eviction is applied lazily, so
   /// the count can briefly include entries that are already invalidated.
   pub fn cache_len(&self) -> u64 {
      self.state.cache.len()
   }

   /// Receive every change committed after this call.
   pub fn subscribe(&self) -> broadcast::Receiver<GalleryChange> {
      self.state.changes.subscribe()
   }

   /// Like [`GalleryStore::subscribe`], as a `Stream`.
   pub fn subscribe_stream(&self) -> GalleryChangeStream {
      GalleryChangeStream::new(self.state.changes.subscribe())
   }

   /// Run a mutation on its own task and wait for it.
   ///
   /// The task owns its inputs and a handle to the store state, so it runs
   /// to completion even when the returned future is dropped.
   pub(crate) async fn detached<T, F, Fut>(&self, work: F) -> Result<T>
   where
      F: FnOnce(Arc<StoreState>) -> Fut,
      Fut: Future<Output = Result<T>> + Send + 'static,
      T: Send + 'static,
   {
      match tokio::spawn(work(Arc::clone(&self.state))).await {
         Ok(result) => result,
         Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
         Err(_) => Err(Error::Cancelled),
      }
   }
}

impl StoreState {
   pub(crate) fn reader(&self) -> Result<&Pool<Sqlite>> {
      self.db.read_pool().map_err(Error::query)
   }

   pub(crate) async fn writer(&self) -> Result<WriteGuard> {
      self.db.acquire_writer().await.map_err(Error::mutation)
   }

   /// Record one statement about to be sent.
   pub(crate) fn note_statement(&self) {
      let _count = self.statements.fetch_add(1, Ordering::Relaxed) + 1;
      #[cfg(test)]
      if let Some(hook) = self.on_statement.lock().as_mut() {
         hook(_count);
      }
   }

   /// Evict `ids` from the cache and tell subscribers. Called only after a
   /// commit.
   pub(crate) fn committed(&self, kind: ChangeKind, ids: Vec<i64>) {
      self.cache.invalidate(&ids);
      self.changes.publish(kind, ids);
   }
}
