//! Mutations
//!
//! Each mutation is atomic: it commits completely or not at all. After a
//! commit, and before returning, the touched ids are evicted from the cache
//! and a change is published. A failed or cancelled mutation leaves both the
//! database and the cache as they were.
//!
//! The public methods copy their arguments and hand the work to
//! `GalleryStore::detached`, so a commit is always followed by its eviction
//! even if the caller stops waiting.

use std::collections::HashMap;

use gallery_batch_toolkit::{BulkInsert, OnConflict, in_list_query, unique_keys};
use indexmap::IndexMap;
use sqlx::Connection;
use sqlx::types::Json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::changes::ChangeKind;
use crate::models::{ImageMetadata, NewImage, to_unix_millis};
use crate::schema::{IMAGE_UPSERT_COLUMNS, METADATA_COLUMNS};
use crate::store::{GalleryStore, StoreState};
use crate::transaction::{ensure_not_cancelled, finish};
use crate::{Error, Result};

const UPSERT_IMAGE_SQL: &str = "INSERT INTO images \
   (file_path, file_name, file_size, width, height, created_at, modified_at, is_deleted) \
   VALUES (?, ?, ?, ?, ?, ?, ?, 0) \
   ON CONFLICT (file_path) DO UPDATE SET \
   file_name = excluded.file_name, file_size = excluded.file_size, \
   width = excluded.width, height = excluded.height, \
   created_at = excluded.created_at, modified_at = excluded.modified_at, \
   is_deleted = 0 \
   RETURNING id";

const TOGGLE_FAVORITE_SQL: &str = "INSERT INTO favorites (image_id, is_favorite) VALUES (?, 1) \
   ON CONFLICT (image_id) DO UPDATE SET is_favorite = NOT is_favorite \
   RETURNING is_favorite";

/// Multi-row form of [`UPSERT_IMAGE_SQL`].
fn image_upsert() -> gallery_batch_toolkit::Result<BulkInsert> {
   let assignments = IMAGE_UPSERT_COLUMNS
      .iter()
      .skip(1)
      .map(|column| (column.to_string(), format!("excluded.{}", column)))
      .chain([("is_deleted".to_string(), "0".to_string())])
      .collect();

   BulkInsert::new("images", IMAGE_UPSERT_COLUMNS)?
      .on_conflict(OnConflict::Update {
         target: vec!["file_path".to_string()],
         assignments,
      })?
      .returning(["id", "file_path"])
}

/// `INSERT OR REPLACE` of one metadata row, keyed by `image_id`.
fn metadata_replace() -> gallery_batch_toolkit::Result<BulkInsert> {
   BulkInsert::new("metadata", std::iter::once("image_id").chain(METADATA_COLUMNS))?
      .on_conflict(OnConflict::Replace)
}

/// Trim and lowercase a tag. Empty results are rejected.
fn normalize_tag(tag: &str) -> Result<String> {
   let normalized = tag.trim().to_lowercase();
   if normalized.is_empty() {
      return Err(Error::InvalidTag(tag.to_string()));
   }
   Ok(normalized)
}

impl GalleryStore {
   /// Insert an image, or update the image already stored at the same path.
   ///
   /// Returns the image id, which stays stable across updates. Upserting a
   /// soft-deleted path restores it; its metadata, tags and favorite state
   /// are kept.
   pub async fn upsert_image(&self, image: &NewImage) -> Result<i64> {
      let image = image.clone();
      self.detached(move |state| async move { state.upsert_image(&image).await })
         .await
   }

   /// Upsert many images in one transaction.
   ///
   /// When a path appears more than once the last entry wins. Returns the id
   /// of every distinct path, in first-seen order.
   pub async fn batch_upsert_images(&self, images: &[NewImage]) -> Result<IndexMap<String, i64>> {
      if images.is_empty() {
         return Ok(IndexMap::new());
      }
      let images = images.to_vec();
      self.detached(move |state| async move { state.batch_upsert_images(&images).await })
         .await
   }

   /// Store generation metadata for an image, replacing any previous record.
   ///
   /// Fails with [`Error::StorageMutation`] when `image_id` does not exist.
   pub async fn upsert_metadata(&self, image_id: i64, metadata: &ImageMetadata) -> Result<()> {
      let metadata = metadata.clone();
      self.detached(move |state| async move { state.upsert_metadata(image_id, &metadata).await })
         .await
   }

   /// Attach a tag to an image, creating the tag if needed.
   ///
   /// Tags are trimmed and lowercased. Returns `false` when the image already
   /// had the tag.
   pub async fn add_tag(&self, image_id: i64, tag: &str) -> Result<bool> {
      let tag = tag.to_string();
      self.detached(move |state| async move { state.add_tag(image_id, &tag).await })
         .await
   }

   /// Detach a tag from an image. Returns `false` when it was not attached.
   pub async fn remove_tag(&self, image_id: i64, tag: &str) -> Result<bool> {
      let tag = tag.to_string();
      self.detached(move |state| async move { state.remove_tag(image_id, &tag).await })
         .await
   }

   /// Flip the favorite flag of an image and return the new state.
   ///
   /// An image that was never favorited becomes a favorite.
   pub async fn toggle_favorite(&self, image_id: i64) -> Result<bool> {
      self.detached(move |state| async move { state.toggle_favorite(image_id).await })
         .await
   }

   /// Soft-delete the image at `file_path`.
   ///
   /// Returns `false` when no live image has that path. The row and its
   /// metadata, tags and favorite state are kept.
   pub async fn mark_as_deleted(&self, file_path: &str) -> Result<bool> {
      Ok(self.batch_mark_as_deleted(&[file_path]).await? > 0)
   }

   /// Soft-delete every image at `paths` in one transaction.
   ///
   /// Returns how many live images were marked. Unknown and already deleted
   /// paths are ignored.
   pub async fn batch_mark_as_deleted<S: AsRef<str>>(&self, paths: &[S]) -> Result<usize> {
      if paths.is_empty() {
         return Ok(0);
      }
      let paths: Vec<String> = paths.iter().map(|p| p.as_ref().to_string()).collect();
      self.detached(move |state| async move { state.mark_paths_deleted(&paths, None).await })
         .await
   }

   /// [`GalleryStore::batch_mark_as_deleted`] that gives up when `token` is
   /// cancelled.
   ///
   /// The token is checked before each chunk and before commit. Cancellation
   /// rolls back every chunk already applied and fails with
   /// [`Error::Cancelled`].
   pub async fn batch_mark_as_deleted_cancellable<S: AsRef<str>>(
      &self,
      paths: &[S],
      token: &CancellationToken,
   ) -> Result<usize> {
      if paths.is_empty() {
         return Ok(0);
      }
      ensure_not_cancelled(Some(token))?;
      let paths: Vec<String> = paths.iter().map(|p| p.as_ref().to_string()).collect();
      let token = token.clone();
      self.detached(move |state| async move {
         state.mark_paths_deleted(&paths, Some(&token)).await
      })
      .await
   }
}

impl StoreState {
   async fn upsert_image(&self, image: &NewImage) -> Result<i64> {
      let mut writer = self.writer().await?;
      self.note_statement();
      let id: i64 = sqlx::query_scalar(UPSERT_IMAGE_SQL)
         .bind(&image.file_path)
         .bind(&image.file_name)
         .bind(image.file_size)
         .bind(image.width)
         .bind(image.height)
         .bind(to_unix_millis(image.created_at))
         .bind(to_unix_millis(image.modified_at))
         .fetch_one(&mut *writer)
         .await
         .map_err(Error::mutation)?;
      drop(writer);

      self.committed(ChangeKind::ImagesUpserted, vec![id]);
      debug!(id, path = %image.file_path, "Upserted image");
      Ok(id)
   }

   async fn batch_upsert_images(&self, images: &[NewImage]) -> Result<IndexMap<String, i64>> {
      if images.is_empty() {
         return Ok(IndexMap::new());
      }

      let mut latest: IndexMap<&str, &NewImage> = IndexMap::with_capacity(images.len());
      for image in images {
         latest.insert(image.file_path.as_str(), image);
      }
      let rows: Vec<&NewImage> = latest.values().copied().collect();

      let insert = image_upsert().map_err(Error::mutation)?;
      let chunks = self
         .chunk_policy
         .chunks(&rows, insert.params_per_row())
         .map_err(Error::mutation)?;

      let mut writer = self.writer().await?;
      let mut tx = writer.begin().await.map_err(Error::mutation)?;

      let result = async {
         let mut ids: HashMap<String, i64> = HashMap::with_capacity(rows.len());
         for chunk in chunks {
            let mut builder = insert.build(chunk.iter().copied(), |mut row, image| {
               row.push_bind(image.file_path.as_str())
                  .push_bind(image.file_name.as_str())
                  .push_bind(image.file_size)
                  .push_bind(image.width)
                  .push_bind(image.height)
                  .push_bind(to_unix_millis(image.created_at))
                  .push_bind(to_unix_millis(image.modified_at));
            });
            self.note_statement();
            let returned: Vec<(i64, String)> = builder
               .build_query_as()
               .fetch_all(&mut *tx)
               .await
               .map_err(Error::mutation)?;
            ids.extend(returned.into_iter().map(|(id, path)| (path, id)));
         }
         Ok::<HashMap<String, i64>, Error>(ids)
      }
      .await;

      let ids = finish(tx, result).await?;
      drop(writer);

      let ordered: IndexMap<String, i64> = latest
         .keys()
         .filter_map(|path| ids.get(*path).map(|id| (path.to_string(), *id)))
         .collect();

      self.committed(ChangeKind::ImagesUpserted, ordered.values().copied().collect());
      debug!(count = ordered.len(), "Upserted image batch");
      Ok(ordered)
   }

   async fn upsert_metadata(&self, image_id: i64, metadata: &ImageMetadata) -> Result<()> {
      let insert = metadata_replace().map_err(Error::mutation)?;
      let mut builder = insert.build(std::iter::once(metadata), |mut row, metadata| {
         row.push_bind(image_id)
            .push_bind(metadata.prompt.as_str())
            .push_bind(metadata.negative_prompt.as_str())
            .push_bind(metadata.seed)
            .push_bind(metadata.sampler.as_deref())
            .push_bind(metadata.steps)
            .push_bind(metadata.scale)
            .push_bind(metadata.width)
            .push_bind(metadata.height)
            .push_bind(metadata.model.as_deref())
            .push_bind(metadata.flags.smea)
            .push_bind(metadata.flags.smea_dyn)
            .push_bind(metadata.flags.dynamic_thresholding)
            .push_bind(metadata.flags.variety_plus)
            .push_bind(metadata.raw_json.as_ref().map(Json));
      });

      let mut writer = self.writer().await?;
      self.note_statement();
      builder
         .build()
         .execute(&mut *writer)
         .await
         .map_err(Error::mutation)?;
      drop(writer);

      self.committed(ChangeKind::MetadataReplaced, vec![image_id]);
      debug!(image_id, "Replaced image metadata");
      Ok(())
   }

   async fn add_tag(&self, image_id: i64, tag: &str) -> Result<bool> {
      let name = normalize_tag(tag)?;

      let mut writer = self.writer().await?;
      let mut tx = writer.begin().await.map_err(Error::mutation)?;

      let result = async {
         self.note_statement();
         sqlx::query("INSERT OR IGNORE INTO tags (name) VALUES (?)")
            .bind(&name)
            .execute(&mut *tx)
            .await
            .map_err(Error::mutation)?;

         self.note_statement();
         let tag_id: i64 = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
            .bind(&name)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::mutation)?;

         self.note_statement();
         let added = sqlx::query("INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?, ?)")
            .bind(image_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::mutation)?
            .rows_affected();

         Ok::<bool, Error>(added > 0)
      }
      .await;

      let added = finish(tx, result).await?;
      drop(writer);

      if added {
         self.committed(ChangeKind::TagsChanged, vec![image_id]);
      } else {
         self.cache.invalidate(&[image_id]);
      }
      debug!(image_id, tag = %name, added, "Tagged image");
      Ok(added)
   }

   async fn remove_tag(&self, image_id: i64, tag: &str) -> Result<bool> {
      let name = normalize_tag(tag)?;

      let mut writer = self.writer().await?;
      self.note_statement();
      let removed = sqlx::query(
         "DELETE FROM image_tags WHERE image_id = ? \
          AND tag_id = (SELECT id FROM tags WHERE name = ?)",
      )
      .bind(image_id)
      .bind(&name)
      .execute(&mut *writer)
      .await
      .map_err(Error::mutation)?
      .rows_affected();
      drop(writer);

      if removed > 0 {
         self.committed(ChangeKind::TagsChanged, vec![image_id]);
      }
      debug!(image_id, tag = %name, removed = removed > 0, "Untagged image");
      Ok(removed > 0)
   }

   async fn toggle_favorite(&self, image_id: i64) -> Result<bool> {
      let mut writer = self.writer().await?;
      self.note_statement();
      let is_favorite: bool = sqlx::query_scalar(TOGGLE_FAVORITE_SQL)
         .bind(image_id)
         .fetch_one(&mut *writer)
         .await
         .map_err(Error::mutation)?;
      drop(writer);

      self.committed(ChangeKind::FavoriteToggled { is_favorite }, vec![image_id]);
      debug!(image_id, is_favorite, "Toggled favorite");
      Ok(is_favorite)
   }

   async fn mark_paths_deleted(
      &self,
      paths: &[String],
      token: Option<&CancellationToken>,
   ) -> Result<usize> {
      if paths.is_empty() {
         return Ok(0);
      }
      ensure_not_cancelled(token)?;

      let unique = unique_keys(paths.iter().map(String::as_str));
      let chunks = self.chunk_policy.chunks(&unique, 1).map_err(Error::mutation)?;

      let mut writer = self.writer().await?;
      let mut tx = writer.begin().await.map_err(Error::mutation)?;

      let result = async {
         let mut ids = Vec::new();
         for chunk in chunks {
            ensure_not_cancelled(token)?;
            let mut builder = in_list_query(
               "UPDATE images SET is_deleted = 1 WHERE is_deleted = 0 AND file_path",
               chunk.iter().copied(),
               " RETURNING id",
            );
            self.note_statement();
            let marked: Vec<i64> = builder
               .build_query_scalar()
               .fetch_all(&mut *tx)
               .await
               .map_err(Error::mutation)?;
            ids.extend(marked);
         }
         ensure_not_cancelled(token)?;
         Ok::<Vec<i64>, Error>(ids)
      }
      .await;

      let ids = finish(tx, result).await?;
      drop(writer);

      let count = ids.len();
      self.committed(ChangeKind::ImagesDeleted, ids);
      debug!(requested = unique.len(), deleted = count, "Marked images deleted");
      Ok(count)
   }
}
