//! Records returned and accepted by the store

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};
use time::OffsetDateTime;

/// One image file tracked by the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
   /// Surrogate key assigned on first insert. Never changes, including
   /// across soft delete and resurrection.
   pub id: i64,
   pub file_path: String,
   pub file_name: String,
   pub file_size: i64,
   pub width: Option<u32>,
   pub height: Option<u32>,
   #[serde(with = "time::serde::rfc3339")]
   pub created_at: OffsetDateTime,
   #[serde(with = "time::serde::rfc3339")]
   pub modified_at: OffsetDateTime,
   pub is_deleted: bool,
}

impl FromRow<'_, SqliteRow> for ImageRecord {
   fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
      Ok(Self {
         id: row.try_get("id")?,
         file_path: row.try_get("file_path")?,
         file_name: row.try_get("file_name")?,
         file_size: row.try_get("file_size")?,
         width: row.try_get("width")?,
         height: row.try_get("height")?,
         created_at: from_unix_millis("created_at", row.try_get("created_at")?)?,
         modified_at: from_unix_millis("modified_at", row.try_get("modified_at")?)?,
         is_deleted: row.try_get("is_deleted")?,
      })
   }
}

/// File facts supplied when inserting or refreshing an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
   pub file_path: String,
   pub file_name: String,
   pub file_size: i64,
   pub width: Option<u32>,
   pub height: Option<u32>,
   pub created_at: OffsetDateTime,
   pub modified_at: OffsetDateTime,
}

impl NewImage {
   pub fn new(
      file_path: impl Into<String>,
      file_name: impl Into<String>,
      file_size: i64,
      created_at: OffsetDateTime,
      modified_at: OffsetDateTime,
   ) -> Self {
      Self {
         file_path: file_path.into(),
         file_name: file_name.into(),
         file_size,
         width: None,
         height: None,
         created_at,
         modified_at,
      }
   }

   pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
      self.width = Some(width);
      self.height = Some(height);
      self
   }
}

/// Optional generation switches recorded with an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationFlags {
   pub smea: Option<bool>,
   pub smea_dyn: Option<bool>,
   pub dynamic_thresholding: Option<bool>,
   pub variety_plus: Option<bool>,
}

/// Generation parameters for one image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
   pub prompt: String,
   pub negative_prompt: String,
   pub seed: Option<i64>,
   pub sampler: Option<String>,
   pub steps: Option<u32>,
   pub scale: Option<f64>,
   pub width: Option<u32>,
   pub height: Option<u32>,
   pub model: Option<String>,
   pub flags: GenerationFlags,
   /// Parameter blob exactly as it was embedded in the file.
   pub raw_json: Option<JsonValue>,
}

impl FromRow<'_, SqliteRow> for ImageMetadata {
   fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
      let raw_json: Option<Json<JsonValue>> = row.try_get("raw_json")?;

      Ok(Self {
         prompt: row.try_get("prompt")?,
         negative_prompt: row.try_get("negative_prompt")?,
         seed: row.try_get("seed")?,
         sampler: row.try_get("sampler")?,
         steps: row.try_get("steps")?,
         scale: row.try_get("scale")?,
         width: row.try_get("width")?,
         height: row.try_get("height")?,
         model: row.try_get("model")?,
         flags: GenerationFlags {
            smea: row.try_get("smea")?,
            smea_dyn: row.try_get("smea_dyn")?,
            dynamic_thresholding: row.try_get("dynamic_thresholding")?,
            variety_plus: row.try_get("variety_plus")?,
         },
         raw_json: raw_json.map(|json| json.0),
      })
   }
}

/// Position after the last image of a listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCursor {
   pub modified_at_ms: i64,
   pub id: i64,
}

impl ImageCursor {
   pub(crate) fn after(record: &ImageRecord) -> Self {
      Self {
         modified_at_ms: to_unix_millis(record.modified_at),
         id: record.id,
      }
   }

   pub(crate) fn values(&self) -> [i64; 2] {
      [self.modified_at_ms, self.id]
   }
}

/// One page of the most-recent-first image listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePage {
   pub images: Vec<ImageRecord>,
   /// Pass to the next `list_images` call, or `None` on the last page.
   pub next_cursor: Option<ImageCursor>,
   pub has_more: bool,
}

/// Timestamps are stored as unix milliseconds.
pub(crate) fn to_unix_millis(at: OffsetDateTime) -> i64 {
   (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_unix_millis(column: &str, millis: i64) -> Result<OffsetDateTime, sqlx::Error> {
   OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).map_err(|e| {
      sqlx::Error::ColumnDecode {
         index: column.to_string(),
         source: Box::new(e),
      }
   })
}
