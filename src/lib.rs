//! # nai-gallery-store
//!
//! Local image-metadata store for the NAI Launcher gallery: a SQLite library
//! of images, generation metadata, tags and favorites, answered in batches
//! and fronted by a write-through memory cache.
//!
//! ## Core Types
//!
//! - **[`GalleryStore`]**: open, query and mutate a library
//! - **[`GalleryStoreConfig`]**: database path, pool, cache and chunking settings
//! - **[`ImageRecord`]** / **[`ImageMetadata`]**: stored rows
//! - **[`GalleryChange`]**: notification published after each committed mutation
//! - **[`Error`]**: failures, split into init, read and write kinds
//!
//! ## Example
//!
//! ```no_run
//! use nai_gallery_store::{GalleryStore, GalleryStoreConfig, NewImage};
//! use time::OffsetDateTime;
//!
//! # async fn example() -> nai_gallery_store::Result<()> {
//! let store = GalleryStore::open(GalleryStoreConfig::new("/data/gallery/library.db")).await?;
//!
//! let now = OffsetDateTime::now_utc();
//! let id = store
//!    .upsert_image(&NewImage::new("/img/a.png", "a.png", 1024, now, now))
//!    .await?;
//! store.add_tag(id, "landscape").await?;
//!
//! let records = store.get_images_by_ids(&[id]).await?;
//! let tags = store.get_tags_by_image_ids(&[id]).await?;
//! assert_eq!(records.len(), 1);
//! assert_eq!(tags[&id], vec!["landscape".to_string()]);
//!
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod changes;
mod config;
mod error;
mod models;
mod reads;
mod schema;
mod store;
mod transaction;
mod writes;

pub use changes::{ChangeEvent, ChangeKind, GalleryChange, GalleryChangeStream};
pub use config::GalleryStoreConfig;
pub use error::{Error, Result, StorageFailure};
pub use models::{GenerationFlags, ImageCursor, ImageMetadata, ImagePage, ImageRecord, NewImage};
pub use store::GalleryStore;
pub use tokio_util::sync::CancellationToken;
