//! Embedded schema and migrations

use gallery_conn_mgr::SqliteDatabase;
use sqlx::migrate::Migrator;
use tracing::debug;

use crate::error::StorageFailure;

/// Migrations under `migrations/`, compiled into the binary.
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Columns selected for an [`crate::ImageRecord`].
pub(crate) const IMAGE_COLUMNS: &str =
   "id, file_path, file_name, file_size, width, height, created_at, modified_at, is_deleted";

/// Columns of the metadata table, in bind order after `image_id`.
pub(crate) const METADATA_COLUMNS: [&str; 14] = [
   "prompt",
   "negative_prompt",
   "seed",
   "sampler",
   "steps",
   "scale",
   "width",
   "height",
   "model",
   "smea",
   "smea_dyn",
   "dynamic_thresholding",
   "variety_plus",
   "raw_json",
];

/// Columns bound per row when upserting images.
pub(crate) const IMAGE_UPSERT_COLUMNS: [&str; 7] = [
   "file_path",
   "file_name",
   "file_size",
   "width",
   "height",
   "created_at",
   "modified_at",
];

/// Apply pending migrations through the writer. A no-op for an up-to-date file.
pub(crate) async fn migrate(db: &SqliteDatabase) -> Result<(), StorageFailure> {
   let mut writer = db.acquire_writer().await?;
   MIGRATOR.run(&mut *writer).await?;
   debug!(path = %db.path().display(), "Schema migrations applied");
   Ok(())
}

/// Newest migration version compiled into this build.
pub(crate) fn latest_version() -> i64 {
   MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0)
}
