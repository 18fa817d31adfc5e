//! Write-through memory cache keyed by image id.
//!
//! Two bounded maps back the batch getters: image records and per-image
//! metadata (absence cached as `None`). Reads fill the cache after a database
//! miss; every committed mutation invalidates the ids it touched before the
//! mutation returns.
//!
//! A fill carries the generation observed before its database query started.
//! Invalidation bumps the generation under the same lock a fill holds while
//! inserting, so a query that raced a mutation can never put pre-mutation
//! rows back into the cache.

use std::collections::HashMap;

use mini_moka::sync::Cache;
use parking_lot::Mutex;
use tracing::trace;

use crate::models::{ImageMetadata, ImageRecord};

pub(crate) struct ImageCache {
   records: Cache<i64, ImageRecord>,
   metadata: Cache<i64, Option<ImageMetadata>>,
   generation: Mutex<u64>,
}

/// Cached values found for a key list, plus the keys that must be fetched.
pub(crate) struct Lookup<V> {
   pub hits: HashMap<i64, V>,
   pub misses: Vec<i64>,
   pub generation: u64,
}

impl ImageCache {
   pub fn new(capacity: u64) -> Self {
      Self {
         records: Cache::new(capacity),
         metadata: Cache::new(capacity),
         generation: Mutex::new(0),
      }
   }

   /// Split unique `ids` into cached records and ids to fetch.
   pub fn lookup_records(&self, ids: &[i64]) -> Lookup<ImageRecord> {
      self.lookup(ids, |id| self.records.get(&id))
   }

   /// Split unique `ids` into cached metadata (including cached absence) and
   /// ids to fetch.
   pub fn lookup_metadata(&self, ids: &[i64]) -> Lookup<Option<ImageMetadata>> {
      self.lookup(ids, |id| self.metadata.get(&id))
   }

   fn lookup<V>(&self, ids: &[i64], get: impl Fn(i64) -> Option<V>) -> Lookup<V> {
      // Read the generation first: anything invalidated after this point
      // makes the later fill a no-op.
      let generation = *self.generation.lock();
      let mut hits = HashMap::with_capacity(ids.len());
      let mut misses = Vec::new();

      for &id in ids {
         match get(id) {
            Some(value) => {
               hits.insert(id, value);
            }
            None => misses.push(id),
         }
      }

      trace!(hits = hits.len(), misses = misses.len(), "Cache lookup");
      Lookup {
         hits,
         misses,
         generation,
      }
   }

   /// Current generation, for fills that are not preceded by a lookup.
   pub fn generation(&self) -> u64 {
      *self.generation.lock()
   }

   /// Insert fetched records unless an invalidation happened since `generation`.
   pub fn fill_records<'a>(
      &self,
      generation: u64,
      records: impl IntoIterator<Item = &'a ImageRecord>,
   ) -> bool {
      let current = self.generation.lock();
      if *current != generation {
         trace!("Discarding stale record fill");
         return false;
      }
      for record in records {
         self.records.insert(record.id, record.clone());
      }
      true
   }

   /// Insert fetched metadata unless an invalidation happened since `generation`.
   pub fn fill_metadata<'a>(
      &self,
      generation: u64,
      entries: impl IntoIterator<Item = (i64, &'a Option<ImageMetadata>)>,
   ) -> bool {
      let current = self.generation.lock();
      if *current != generation {
         trace!("Discarding stale metadata fill");
         return false;
      }
      for (id, metadata) in entries {
         self.metadata.insert(id, metadata.clone());
      }
      true
   }

   /// Evict every cached value for `ids`.
   pub fn invalidate(&self, ids: &[i64]) {
      let mut generation = self.generation.lock();
      *generation += 1;
      for id in ids {
         self.records.invalidate(id);
         self.metadata.invalidate(id);
      }
      trace!(count = ids.len(), generation = *generation, "Invalidated cache entries");
   }

   pub fn clear(&self) {
      let mut generation = self.generation.lock();
      *generation += 1;
      self.records.invalidate_all();
      self.metadata.invalidate_all();
   }

   /// Approximate number of cached entries across both maps.
   pub fn len(&self) -> u64 {
      self.records.entry_count() + self.metadata.entry_count()
   }
}
