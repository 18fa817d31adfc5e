//! End-to-end behavior of the store against a real SQLite file.

use std::sync::Arc;
use std::time::Duration;

use nai_gallery_store::{
   CancellationToken, ChangeKind, Error, GalleryStore, GalleryStoreConfig, GenerationFlags,
   ImageMetadata, NewImage,
};
use serde_json::json;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::broadcast::error::TryRecvError;

async fn open_store() -> (GalleryStore, TempDir) {
   open_store_with(|config| config).await
}

async fn open_store_with(
   configure: impl FnOnce(GalleryStoreConfig) -> GalleryStoreConfig,
) -> (GalleryStore, TempDir) {
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let config = configure(GalleryStoreConfig::new(temp_dir.path().join("library.db")));
   let store = GalleryStore::open(config)
      .await
      .expect("Failed to open gallery store");
   (store, temp_dir)
}

fn at(seconds: i64) -> OffsetDateTime {
   OffsetDateTime::from_unix_timestamp(1_700_000_000 + seconds).unwrap()
}

fn image(path: &str, seconds: i64) -> NewImage {
   let name = path.rsplit('/').next().unwrap_or(path);
   NewImage::new(path, name, 1_024 + seconds, at(0), at(seconds)).with_dimensions(832, 1216)
}

fn metadata(prompt: &str) -> ImageMetadata {
   ImageMetadata {
      prompt: prompt.to_string(),
      negative_prompt: "lowres".to_string(),
      seed: Some(42),
      sampler: Some("k_euler_ancestral".to_string()),
      steps: Some(28),
      scale: Some(5.5),
      width: Some(832),
      height: Some(1216),
      model: Some("nai-diffusion-4-full".to_string()),
      flags: GenerationFlags {
         smea: Some(true),
         smea_dyn: Some(false),
         dynamic_thresholding: None,
         variety_plus: Some(true),
      },
      raw_json: Some(json!({ "prompt": prompt, "seed": 42 })),
   }
}

#[tokio::test]
async fn paths_resolve_to_ids_or_none() {
   let (store, _temp) = open_store().await;
   let id_a = store.upsert_image(&image("/a.png", 1)).await.unwrap();
   let id_b = store.upsert_image(&image("/b.png", 2)).await.unwrap();

   let ids = store
      .get_image_ids_by_paths(&["/a.png", "/b.png", "/c.png"])
      .await
      .unwrap();

   assert_eq!(ids.len(), 3);
   assert_eq!(ids["/a.png"], Some(id_a));
   assert_eq!(ids["/b.png"], Some(id_b));
   assert_eq!(ids["/c.png"], None);
   assert_eq!(
      ids.keys().collect::<Vec<_>>(),
      vec!["/a.png", "/b.png", "/c.png"]
   );
}

#[tokio::test]
async fn images_come_back_in_request_order() {
   let (store, _temp) = open_store().await;
   let id1 = store.upsert_image(&image("/1.png", 1)).await.unwrap();
   let id2 = store.upsert_image(&image("/2.png", 2)).await.unwrap();
   let id3 = store.upsert_image(&image("/3.png", 3)).await.unwrap();

   let records = store.get_images_by_ids(&[id3, id1, id2]).await.unwrap();
   let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
   assert_eq!(ids, vec![id3, id1, id2]);
   assert_eq!(records[0].file_path, "/3.png");
   assert_eq!(records[0].width, Some(832));
   assert_eq!(records[0].modified_at, at(3));

   // Unknown ids are skipped, repeats are kept, nothing is reordered.
   let records = store
      .get_images_by_ids(&[id2, 9_999, id1, id2])
      .await
      .unwrap();
   let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
   assert_eq!(ids, vec![id2, id1, id2]);
}

#[tokio::test]
async fn batch_delete_hides_image() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/gone.png", 1)).await.unwrap();
   assert!(store.get_image_by_id(id).await.unwrap().is_some());

   let deleted = store.batch_mark_as_deleted(&["/gone.png"]).await.unwrap();

   assert_eq!(deleted, 1);
   assert_eq!(store.get_image_by_id(id).await.unwrap(), None);
   assert_eq!(store.count_images().await.unwrap(), 0);
}

#[tokio::test]
async fn batch_getters_follow_the_stored_pattern() {
   let (store, _temp) = open_store().await;

   let mut ids = Vec::new();
   for i in 0..50 {
      let id = store
         .upsert_image(&image(&format!("/batch/{i}.png"), i))
         .await
         .unwrap();
      if i % 4 == 0 {
         store.add_tag(id, "every-fourth").await.unwrap();
      }
      if i % 3 == 0 {
         store.toggle_favorite(id).await.unwrap();
      }
      if i % 2 == 0 {
         store
            .upsert_metadata(id, &metadata(&format!("prompt {i}")))
            .await
            .unwrap();
      }
      ids.push(id);
   }

   let records = store.get_images_by_ids(&ids).await.unwrap();
   let metadata = store.get_metadata_by_image_ids(&ids).await.unwrap();
   let favorites = store.get_favorites_by_image_ids(&ids).await.unwrap();
   let tags = store.get_tags_by_image_ids(&ids).await.unwrap();

   assert_eq!(records.len(), 50);
   assert_eq!(metadata.len(), 50);
   assert_eq!(favorites.len(), 50);
   assert_eq!(tags.len(), 50);

   assert_eq!(metadata.values().filter(|m| m.is_some()).count(), 25);
   assert_eq!(favorites.values().filter(|f| **f).count(), 17);
   assert_eq!(tags.values().filter(|t| !t.is_empty()).count(), 13);

   for (i, id) in ids.iter().enumerate() {
      assert_eq!(metadata[id].is_some(), i % 2 == 0, "metadata of image {i}");
      assert_eq!(favorites[id], i % 3 == 0, "favorite of image {i}");
      assert_eq!(tags[id].is_empty(), i % 4 != 0, "tags of image {i}");
   }
}

#[tokio::test]
async fn empty_inputs_issue_no_statements() {
   let (store, _temp) = open_store().await;
   let none: [i64; 0] = [];
   let no_paths: [&str; 0] = [];
   let before = store.statements_executed();

   assert!(store.get_images_by_ids(&none).await.unwrap().is_empty());
   assert!(store.get_image_ids_by_paths(&no_paths).await.unwrap().is_empty());
   assert!(store.get_metadata_by_image_ids(&none).await.unwrap().is_empty());
   assert!(store.get_favorites_by_image_ids(&none).await.unwrap().is_empty());
   assert!(store.get_tags_by_image_ids(&none).await.unwrap().is_empty());
   assert!(store.batch_upsert_images(&[]).await.unwrap().is_empty());
   assert_eq!(store.batch_mark_as_deleted(&no_paths).await.unwrap(), 0);

   assert_eq!(store.statements_executed(), before);
}

#[tokio::test]
async fn cached_reads_issue_no_statements() {
   let (store, _temp) = open_store().await;
   let with_meta = store.upsert_image(&image("/meta.png", 1)).await.unwrap();
   let without_meta = store.upsert_image(&image("/plain.png", 2)).await.unwrap();
   store
      .upsert_metadata(with_meta, &metadata("cat"))
      .await
      .unwrap();

   let ids = [with_meta, without_meta];
   let first_records = store.get_images_by_ids(&ids).await.unwrap();
   let first_metadata = store.get_metadata_by_image_ids(&ids).await.unwrap();
   let before = store.statements_executed();

   let second_records = store.get_images_by_ids(&ids).await.unwrap();
   let second_metadata = store.get_metadata_by_image_ids(&ids).await.unwrap();

   assert_eq!(store.statements_executed(), before);
   assert_eq!(first_records, second_records);
   assert_eq!(first_metadata, second_metadata);
   assert_eq!(second_metadata[&without_meta], None);
   assert_eq!(second_metadata[&with_meta].as_ref().unwrap().prompt, "cat");
}

#[tokio::test]
async fn reads_reflect_mutations_after_caching() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/fresh.png", 1)).await.unwrap();
   store.upsert_metadata(id, &metadata("before")).await.unwrap();

   // Warm the cache.
   store.get_images_by_ids(&[id]).await.unwrap();
   store.get_metadata_by_image_ids(&[id]).await.unwrap();

   let mut refreshed = image("/fresh.png", 5);
   refreshed.file_size = 4_096;
   assert_eq!(store.upsert_image(&refreshed).await.unwrap(), id);
   let record = store.get_image_by_id(id).await.unwrap().unwrap();
   assert_eq!(record.file_size, 4_096);
   assert_eq!(record.modified_at, at(5));

   store.upsert_metadata(id, &metadata("after")).await.unwrap();
   let meta = store.get_metadata_by_image_ids(&[id]).await.unwrap();
   assert_eq!(meta[&id].as_ref().unwrap().prompt, "after");

   assert!(store.add_tag(id, "sky").await.unwrap());
   assert_eq!(store.get_tags_by_image_ids(&[id]).await.unwrap()[&id], vec!["sky"]);

   assert!(store.toggle_favorite(id).await.unwrap());
   assert!(store.get_favorites_by_image_ids(&[id]).await.unwrap()[&id]);

   assert!(store.mark_as_deleted("/fresh.png").await.unwrap());
   assert_eq!(store.get_image_by_id(id).await.unwrap(), None);
}

#[tokio::test]
async fn abandoned_upserts_never_leave_stale_cache_entries() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/raced.png", 0)).await.unwrap();

   for i in 0..200_i64 {
      // Warm the cache, then give up on the next write at a varying point.
      store.get_image_by_id(id).await.unwrap();
      let mut resized = image("/raced.png", 0);
      resized.file_size = 10_000 + i;
      let _ = tokio::time::timeout(
         Duration::from_micros(10 + 2 * i as u64),
         store.upsert_image(&resized),
      )
      .await;

      // Writes are serialized, so this one waits out the abandoned write.
      store.toggle_favorite(id).await.unwrap();

      let cached = store.get_image_by_id(id).await.unwrap().unwrap();
      let stored = store.list_images(1, None).await.unwrap().images.remove(0);
      assert_eq!(cached.file_size, stored.file_size, "iteration {i}");
   }
}

#[tokio::test]
async fn metadata_round_trips_every_field() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/full.png", 1)).await.unwrap();
   let stored = metadata("a castle on a hill");

   store.upsert_metadata(id, &stored).await.unwrap();

   let fetched = store.get_metadata_by_image_ids(&[id]).await.unwrap();
   assert_eq!(fetched[&id].as_ref(), Some(&stored));
}

#[tokio::test]
async fn tagging_twice_keeps_one_association() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/tagged.png", 1)).await.unwrap();

   assert!(store.add_tag(id, "x").await.unwrap());
   assert!(!store.add_tag(id, "x").await.unwrap());
   assert!(!store.add_tag(id, "  X ").await.unwrap());

   let tags = store.get_tags_by_image_ids(&[id]).await.unwrap();
   assert_eq!(tags[&id], vec!["x"]);
}

#[tokio::test]
async fn tags_can_be_removed() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/untag.png", 1)).await.unwrap();
   store.add_tag(id, "beach").await.unwrap();
   store.add_tag(id, "sunset").await.unwrap();

   assert!(store.remove_tag(id, "Beach").await.unwrap());
   assert!(!store.remove_tag(id, "beach").await.unwrap());
   assert!(!store.remove_tag(id, "never-used").await.unwrap());

   let tags = store.get_tags_by_image_ids(&[id]).await.unwrap();
   assert_eq!(tags[&id], vec!["sunset"]);
}

#[tokio::test]
async fn blank_tags_are_rejected() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/blank.png", 1)).await.unwrap();

   let err = store.add_tag(id, "   ").await.unwrap_err();
   assert!(matches!(err, Error::InvalidTag(_)));
}

#[tokio::test]
async fn toggle_returns_new_state() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/fav.png", 1)).await.unwrap();

   assert!(store.toggle_favorite(id).await.unwrap());
   assert!(store.get_favorites_by_image_ids(&[id]).await.unwrap()[&id]);

   assert!(!store.toggle_favorite(id).await.unwrap());
   assert!(!store.get_favorites_by_image_ids(&[id]).await.unwrap()[&id]);
}

#[tokio::test]
async fn favorites_default_to_false() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/plain.png", 1)).await.unwrap();

   let favorites = store
      .get_favorites_by_image_ids(&[id, 12_345])
      .await
      .unwrap();

   assert_eq!(favorites.len(), 2);
   assert!(!favorites[&id]);
   assert!(!favorites[&12_345]);
}

#[tokio::test]
async fn resurrection_keeps_the_same_id() {
   let (store, _temp) = open_store().await;
   let id = store.upsert_image(&image("/phoenix.png", 1)).await.unwrap();
   store.upsert_metadata(id, &metadata("rebirth")).await.unwrap();
   store.toggle_favorite(id).await.unwrap();

   assert!(store.mark_as_deleted("/phoenix.png").await.unwrap());
   assert!(!store.mark_as_deleted("/phoenix.png").await.unwrap());
   let ids = store.get_image_ids_by_paths(&["/phoenix.png"]).await.unwrap();
   assert_eq!(ids["/phoenix.png"], None);
   assert_eq!(store.count_images().await.unwrap(), 0);

   let again = store.upsert_image(&image("/phoenix.png", 9)).await.unwrap();
   assert_eq!(again, id);
   assert_eq!(store.count_images().await.unwrap(), 1);
   let ids = store.get_image_ids_by_paths(&["/phoenix.png"]).await.unwrap();
   assert_eq!(ids["/phoenix.png"], Some(id));

   // Associated rows survive the round trip.
   let meta = store.get_metadata_by_image_ids(&[id]).await.unwrap();
   assert_eq!(meta[&id].as_ref().unwrap().prompt, "rebirth");
   assert!(store.get_favorites_by_image_ids(&[id]).await.unwrap()[&id]);
}

#[tokio::test]
async fn writes_for_unknown_images_fail_as_mutations() {
   let (store, _temp) = open_store().await;

   let err = store.upsert_metadata(777, &metadata("orphan")).await.unwrap_err();
   assert!(matches!(err, Error::StorageMutation(_)), "got {err:?}");
   assert!(err.is_write_failure());

   let err = store.add_tag(777, "orphan").await.unwrap_err();
   assert!(matches!(err, Error::StorageMutation(_)), "got {err:?}");

   let err = store.toggle_favorite(777).await.unwrap_err();
   assert!(matches!(err, Error::StorageMutation(_)), "got {err:?}");

   // The writer is usable again after the rollbacks.
   let id = store.upsert_image(&image("/real.png", 1)).await.unwrap();
   assert!(store.add_tag(id, "orphan").await.unwrap());
}

#[tokio::test]
async fn small_parameter_budget_splits_statements() {
   let (store, _temp) = open_store_with(|config| GalleryStoreConfig {
      max_bound_params: 10,
      ..config
   })
   .await;

   let images: Vec<NewImage> = (0..35)
      .map(|i| image(&format!("/chunk/{i}.png"), i))
      .collect();
   let paths: Vec<String> = images.iter().map(|i| i.file_path.clone()).collect();

   // Seven columns per row: one row per statement under a budget of ten.
   let before = store.statements_executed();
   let upserted = store.batch_upsert_images(&images).await.unwrap();
   assert_eq!(store.statements_executed() - before, 35);
   assert_eq!(upserted.len(), 35);

   // One parameter per key: ten keys per statement.
   let before = store.statements_executed();
   let ids = store.get_image_ids_by_paths(&paths).await.unwrap();
   assert_eq!(store.statements_executed() - before, 4);
   assert!(ids.values().all(Option::is_some));

   let wanted: Vec<i64> = paths.iter().rev().map(|p| ids[p].unwrap()).collect();
   let before = store.statements_executed();
   let records = store.get_images_by_ids(&wanted).await.unwrap();
   assert_eq!(store.statements_executed() - before, 4);
   assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), wanted);

   let before = store.statements_executed();
   let deleted = store.batch_mark_as_deleted(&paths).await.unwrap();
   assert_eq!(store.statements_executed() - before, 4);
   assert_eq!(deleted, 35);
   assert_eq!(store.count_images().await.unwrap(), 0);
}

#[tokio::test]
async fn batch_upsert_keeps_the_last_entry_per_path() {
   let (store, _temp) = open_store().await;
   let existing = store.upsert_image(&image("/dup.png", 1)).await.unwrap();

   let mut newest = image("/dup.png", 3);
   newest.file_size = 9_000;
   let batch = vec![image("/dup.png", 2), image("/other.png", 2), newest];

   let ids = store.batch_upsert_images(&batch).await.unwrap();

   assert_eq!(ids.keys().collect::<Vec<_>>(), vec!["/dup.png", "/other.png"]);
   assert_eq!(ids["/dup.png"], existing);
   let record = store.get_image_by_id(existing).await.unwrap().unwrap();
   assert_eq!(record.file_size, 9_000);
   assert_eq!(store.count_images().await.unwrap(), 2);
}

#[tokio::test]
async fn cancelled_batch_delete_rolls_back() {
   let (store, _temp) = open_store().await;
   for i in 0..5 {
      store
         .upsert_image(&image(&format!("/keep/{i}.png"), i))
         .await
         .unwrap();
   }
   let paths: Vec<String> = (0..5).map(|i| format!("/keep/{i}.png")).collect();

   let token = CancellationToken::new();
   token.cancel();
   let err = store
      .batch_mark_as_deleted_cancellable(&paths, &token)
      .await
      .unwrap_err();

   assert!(matches!(err, Error::Cancelled));
   assert_eq!(store.count_images().await.unwrap(), 5);

   let live = CancellationToken::new();
   let deleted = store
      .batch_mark_as_deleted_cancellable(&paths[..2], &live)
      .await
      .unwrap();
   assert_eq!(deleted, 2);
   assert_eq!(store.count_images().await.unwrap(), 3);
}

#[tokio::test]
async fn listing_pages_newest_first() {
   let (store, _temp) = open_store().await;
   let mut ids = Vec::new();
   for i in 0..7 {
      ids.push(
         store
            .upsert_image(&image(&format!("/list/{i}.png"), i))
            .await
            .unwrap(),
      );
   }
   store.mark_as_deleted("/list/3.png").await.unwrap();

   let mut seen = Vec::new();
   let mut cursor = None;
   let mut pages = 0;
   loop {
      let page = store.list_images(2, cursor).await.unwrap();
      pages += 1;
      seen.extend(page.images.iter().map(|r| r.id));
      if !page.has_more {
         assert_eq!(page.next_cursor, None);
         break;
      }
      cursor = page.next_cursor;
   }

   let expected: Vec<i64> = [6, 5, 4, 2, 1, 0].iter().map(|i| ids[*i]).collect();
   assert_eq!(seen, expected);
   assert_eq!(pages, 3);
}

#[tokio::test]
async fn zero_page_size_is_rejected() {
   let (store, _temp) = open_store().await;

   let err = store.list_images(0, None).await.unwrap_err();
   assert!(matches!(err, Error::InvalidPagination(_)));
   assert!(err.is_read_failure());
}

#[tokio::test]
async fn committed_mutations_are_published() {
   let (store, _temp) = open_store().await;
   let mut rx = store.subscribe();

   let id = store.upsert_image(&image("/notify.png", 1)).await.unwrap();
   let change = rx.recv().await.unwrap();
   assert_eq!(change.kind, ChangeKind::ImagesUpserted);
   assert_eq!(change.image_ids, vec![id]);

   store.toggle_favorite(id).await.unwrap();
   let change = rx.recv().await.unwrap();
   assert_eq!(change.kind, ChangeKind::FavoriteToggled { is_favorite: true });

   // Failed and no-op mutations publish nothing.
   store.toggle_favorite(404).await.unwrap_err();
   store.mark_as_deleted("/missing.png").await.unwrap();
   assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_and_writers() {
   let (store, _temp) = open_store().await;
   let store = Arc::new(store);

   let mut handles = Vec::new();
   for worker in 0..4 {
      let store = Arc::clone(&store);
      handles.push(tokio::spawn(async move {
         for i in 0..10 {
            let path = format!("/w{worker}/{i}.png");
            let id = store.upsert_image(&image(&path, i)).await.unwrap();
            store.toggle_favorite(id).await.unwrap();
            let records = store.get_images_by_ids(&[id]).await.unwrap();
            assert_eq!(records[0].file_path, path);
         }
      }));
   }
   for handle in handles {
      handle.await.unwrap();
   }

   assert_eq!(store.count_images().await.unwrap(), 40);
}
