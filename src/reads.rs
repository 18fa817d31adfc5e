//! Batch reads
//!
//! Every batch getter takes a key list, deduplicates it, and answers with one
//! entry per distinct key. An empty key list returns an empty result without
//! touching the database. Lookups larger than the bound-parameter budget are
//! split into several `IN (...)` statements on one read connection and the
//! partial results are merged; a failure in any chunk fails the whole call.

use std::collections::HashMap;

use gallery_batch_toolkit::pagination::split_page;
use gallery_batch_toolkit::{KeysetColumn, KeysetQuery, in_list_query, unique_keys};
use indexmap::IndexMap;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, Sqlite};
use tracing::{debug, trace};

use crate::models::{ImageCursor, ImageMetadata, ImagePage, ImageRecord};
use crate::schema::IMAGE_COLUMNS;
use crate::store::GalleryStore;
use crate::{Error, Result};

impl GalleryStore {
   /// Resolve file paths to image ids.
   ///
   /// Every distinct path is a key of the result, in first-seen order. Paths
   /// with no live image map to `None`; soft-deleted images are not matched.
   pub async fn get_image_ids_by_paths<S: AsRef<str>>(
      &self,
      paths: &[S],
   ) -> Result<IndexMap<String, Option<i64>>> {
      if paths.is_empty() {
         return Ok(IndexMap::new());
      }

      let unique = unique_keys(paths.iter().map(AsRef::as_ref));
      let mut conn = self.read_connection().await?;
      let mut found: HashMap<String, i64> = HashMap::with_capacity(unique.len());

      for chunk in self.state.chunk_policy.chunks(&unique, 1).map_err(Error::query)? {
         let mut builder = in_list_query(
            "SELECT id, file_path FROM images WHERE is_deleted = 0 AND file_path",
            chunk.iter().copied(),
            "",
         );
         self.state.note_statement();
         let rows: Vec<(i64, String)> = builder
            .build_query_as()
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::query)?;
         found.extend(rows.into_iter().map(|(id, path)| (path, id)));
      }

      trace!(requested = unique.len(), found = found.len(), "Resolved image paths");
      Ok(unique
         .into_iter()
         .map(|path| (path.to_string(), found.get(path).copied()))
         .collect())
   }

   /// Fetch live image records in input order.
   ///
   /// Unknown and soft-deleted ids are skipped. An id given more than once
   /// appears once per occurrence. Cached records are served without a
   /// query; only the misses are fetched, and then cached.
   pub async fn get_images_by_ids(&self, ids: &[i64]) -> Result<Vec<ImageRecord>> {
      if ids.is_empty() {
         return Ok(Vec::new());
      }

      let unique = unique_keys(ids.iter().copied());
      let lookup = self.state.cache.lookup_records(&unique);
      let mut found = lookup.hits;

      if !lookup.misses.is_empty() {
         let fetched = self.fetch_records(&lookup.misses).await?;
         self.state.cache.fill_records(lookup.generation, &fetched);
         found.extend(fetched.into_iter().map(|record| (record.id, record)));
      }

      Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
   }

   /// Fetch one live image record.
   pub async fn get_image_by_id(&self, id: i64) -> Result<Option<ImageRecord>> {
      Ok(self.get_images_by_ids(&[id]).await?.into_iter().next())
   }

   async fn fetch_records(&self, ids: &[i64]) -> Result<Vec<ImageRecord>> {
      let mut conn = self.read_connection().await?;
      let mut records = Vec::with_capacity(ids.len());
      let head = format!("SELECT {} FROM images WHERE is_deleted = 0 AND id", IMAGE_COLUMNS);

      for chunk in self.state.chunk_policy.chunks(ids, 1).map_err(Error::query)? {
         let mut builder = in_list_query(&head, chunk.iter().copied(), "");
         self.state.note_statement();
         let rows: Vec<ImageRecord> = builder
            .build_query_as()
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::query)?;
         records.extend(rows);
      }

      Ok(records)
   }

   /// Fetch generation metadata for each distinct id.
   ///
   /// Ids without stored metadata map to `None`. Both present and absent
   /// entries are cached.
   pub async fn get_metadata_by_image_ids(
      &self,
      ids: &[i64],
   ) -> Result<IndexMap<i64, Option<ImageMetadata>>> {
      if ids.is_empty() {
         return Ok(IndexMap::new());
      }

      let unique = unique_keys(ids.iter().copied());
      let lookup = self.state.cache.lookup_metadata(&unique);
      let mut found = lookup.hits;

      if !lookup.misses.is_empty() {
         let mut fetched = self.fetch_metadata(&lookup.misses).await?;
         let entries: Vec<(i64, Option<ImageMetadata>)> = lookup
            .misses
            .iter()
            .map(|id| (*id, fetched.remove(id)))
            .collect();
         self
            .state.cache
            .fill_metadata(lookup.generation, entries.iter().map(|(id, m)| (*id, m)));
         found.extend(entries);
      }

      Ok(unique
         .into_iter()
         .map(|id| (id, found.remove(&id).flatten()))
         .collect())
   }

   async fn fetch_metadata(&self, ids: &[i64]) -> Result<HashMap<i64, ImageMetadata>> {
      let mut conn = self.read_connection().await?;
      let mut metadata = HashMap::with_capacity(ids.len());

      for chunk in self.state.chunk_policy.chunks(ids, 1).map_err(Error::query)? {
         let mut builder =
            in_list_query("SELECT * FROM metadata WHERE image_id", chunk.iter().copied(), "");
         self.state.note_statement();
         let rows: Vec<SqliteRow> = builder
            .build()
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::query)?;

         for row in &rows {
            let image_id: i64 = row.try_get("image_id").map_err(Error::query)?;
            metadata.insert(image_id, ImageMetadata::from_row(row).map_err(Error::query)?);
         }
      }

      Ok(metadata)
   }

   /// Favorite state per distinct id. Ids never favorited map to `false`.
   pub async fn get_favorites_by_image_ids(&self, ids: &[i64]) -> Result<IndexMap<i64, bool>> {
      if ids.is_empty() {
         return Ok(IndexMap::new());
      }

      let unique = unique_keys(ids.iter().copied());
      let mut conn = self.read_connection().await?;
      let mut favorites: HashMap<i64, bool> = HashMap::new();

      for chunk in self.state.chunk_policy.chunks(&unique, 1).map_err(Error::query)? {
         let mut builder = in_list_query(
            "SELECT image_id, is_favorite FROM favorites WHERE image_id",
            chunk.iter().copied(),
            "",
         );
         self.state.note_statement();
         let rows: Vec<(i64, bool)> = builder
            .build_query_as()
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::query)?;
         favorites.extend(rows);
      }

      Ok(unique
         .into_iter()
         .map(|id| (id, favorites.get(&id).copied().unwrap_or(false)))
         .collect())
   }

   /// Tag names per distinct id, sorted by name. Untagged ids map to an
   /// empty list.
   pub async fn get_tags_by_image_ids(&self, ids: &[i64]) -> Result<IndexMap<i64, Vec<String>>> {
      if ids.is_empty() {
         return Ok(IndexMap::new());
      }

      let unique = unique_keys(ids.iter().copied());
      let mut conn = self.read_connection().await?;
      let mut tags: IndexMap<i64, Vec<String>> =
         unique.iter().map(|id| (*id, Vec::new())).collect();

      for chunk in self.state.chunk_policy.chunks(&unique, 1).map_err(Error::query)? {
         let mut builder = in_list_query(
            "SELECT it.image_id, t.name FROM image_tags it \
             JOIN tags t ON t.id = it.tag_id WHERE it.image_id",
            chunk.iter().copied(),
            " ORDER BY it.image_id, t.name",
         );
         self.state.note_statement();
         let rows: Vec<(i64, String)> = builder
            .build_query_as()
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::query)?;

         for (image_id, name) in rows {
            if let Some(names) = tags.get_mut(&image_id) {
               names.push(name);
            }
         }
      }

      Ok(tags)
   }

   /// Number of images that are not soft-deleted.
   pub async fn count_images(&self) -> Result<u64> {
      let pool = self.state.reader()?;
      self.state.note_statement();
      let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE is_deleted = 0")
         .fetch_one(pool)
         .await
         .map_err(Error::query)?;
      Ok(count.max(0) as u64)
   }

   /// One page of live images, most recently modified first (ties broken by
   /// descending id).
   ///
   /// Pass the previous page's `next_cursor` as `after` to continue. Returned
   /// records are cached.
   pub async fn list_images(
      &self,
      page_size: usize,
      after: Option<ImageCursor>,
   ) -> Result<ImagePage> {
      let keyset = [KeysetColumn::desc("modified_at"), KeysetColumn::desc("id")];
      let query = KeysetQuery::build(
         &format!("SELECT {} FROM images", IMAGE_COLUMNS),
         Some("is_deleted = 0"),
         &keyset,
         after.as_ref().map(|_| keyset.len()),
         page_size,
      )
      .map_err(Error::InvalidPagination)?;

      let mut statement = sqlx::query_as::<_, ImageRecord>(&query.sql);
      if let Some(cursor) = after {
         let values = cursor.values();
         for index in &query.cursor_binds {
            statement = statement.bind(values[*index]);
         }
      }

      let pool = self.state.reader()?;
      let generation = self.state.cache.generation();
      self.state.note_statement();
      let rows = statement.fetch_all(pool).await.map_err(Error::query)?;

      let (images, has_more) = split_page(rows, page_size);
      self.state.cache.fill_records(generation, &images);
      let next_cursor = if has_more {
         images.last().map(ImageCursor::after)
      } else {
         None
      };

      debug!(returned = images.len(), has_more, "Listed images");
      Ok(ImagePage {
         images,
         next_cursor,
         has_more,
      })
   }

   async fn read_connection(&self) -> Result<PoolConnection<Sqlite>> {
      self.state.reader()?.acquire().await.map_err(Error::query)
   }
}
