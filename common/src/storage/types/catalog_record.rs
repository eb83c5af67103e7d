use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::storage::db::SurrealDbClient;

use super::{deserialize_datetime, deserialize_flexible_id, serialize_datetime, StoredObject};

/// Catalog rows carry the label as a short category name; anything longer is a
/// caller bug, not data.
pub const MAX_LABEL_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("SurrealDB error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("Label exceeds {MAX_LABEL_LEN} characters: {0}")]
    LabelTooLong(String),

    #[error("No catalog record with id: {0}")]
    RecordNotFound(String),
}

/// One row of the `plants_data` catalog: a source image and, once mirrored,
/// the location of our own copy.
///
/// Lifecycle is two-state: `url_s3 = None` means pending, `Some` means
/// mirrored. Rows are created by the registrar, mutated exactly once by the
/// synchronizer and never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogRecord {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    pub created_at: DateTime<Utc>,
    pub url_source: String,
    pub label: String,
    #[serde(default)]
    pub url_s3: Option<String>,
}

impl StoredObject for CatalogRecord {
    fn table_name() -> &'static str {
        "plants_data"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

/// Result of an idempotent registration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Inserted(CatalogRecord),
    /// The source url was already cataloged; re-registration is a no-op.
    Existing(CatalogRecord),
}

#[derive(Serialize)]
struct MirrorPatch {
    url_s3: String,
}

#[derive(Deserialize)]
struct CountRow {
    count: usize,
}

impl CatalogRecord {
    pub fn new(url_source: &str, label: &str) -> Result<Self, CatalogError> {
        if label.len() > MAX_LABEL_LEN {
            return Err(CatalogError::LabelTooLong(label.to_string()));
        }

        Ok(Self {
            // v7 ids are time-ordered, which keeps assignment monotonic.
            id: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
            url_source: url_source.to_string(),
            label: label.to_string(),
            url_s3: None,
        })
    }

    /// Register a (source url, label) pair, skipping sources that are already
    /// cataloged. Order-independent and safe to re-run.
    pub async fn register(
        db: &SurrealDbClient,
        url_source: &str,
        label: &str,
    ) -> Result<RegisterOutcome, CatalogError> {
        if let Some(existing) = Self::find_by_url_source(db, url_source).await? {
            return Ok(RegisterOutcome::Existing(existing));
        }

        let record = Self::new(url_source, label)?;
        match db.store_item(record.clone()).await {
            Ok(Some(created)) => Ok(RegisterOutcome::Inserted(created)),
            Ok(None) => Ok(RegisterOutcome::Inserted(record)),
            Err(err) => {
                // The unique index on url_source may have raced us; a row that
                // exists now is still a successful no-op registration.
                match Self::find_by_url_source(db, url_source).await? {
                    Some(existing) => Ok(RegisterOutcome::Existing(existing)),
                    None => Err(err.into()),
                }
            }
        }
    }

    pub async fn find_by_url_source(
        db: &SurrealDbClient,
        url_source: &str,
    ) -> Result<Option<Self>, CatalogError> {
        let mut response = db
            .client
            .query("SELECT * FROM plants_data WHERE url_source = $url")
            .bind(("url", url_source.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// All records that have not been mirrored yet: the work batch for one
    /// synchronizer run.
    pub async fn pending(db: &SurrealDbClient) -> Result<Vec<Self>, CatalogError> {
        let mut response = db
            .client
            .query("SELECT * FROM plants_data WHERE url_s3 IS NONE")
            .await?;
        Ok(response.take(0)?)
    }

    /// Record the mirror location for one row. A single statement, so the
    /// write commits immediately and partial synchronizer progress survives a
    /// crash mid-batch.
    pub async fn set_mirror_url(
        db: &SurrealDbClient,
        id: &str,
        mirror_url: &str,
    ) -> Result<Self, CatalogError> {
        let updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .merge(MirrorPatch {
                url_s3: mirror_url.to_string(),
            })
            .await?;

        updated.ok_or_else(|| CatalogError::RecordNotFound(id.to_string()))
    }

    pub async fn count(db: &SurrealDbClient) -> Result<usize, CatalogError> {
        let mut response = db
            .client
            .query("SELECT count() AS count FROM plants_data GROUP ALL")
            .await?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.into_iter().next().map_or(0, |row| row.count))
    }

    pub async fn pending_count(db: &SurrealDbClient) -> Result<usize, CatalogError> {
        let mut response = db
            .client
            .query("SELECT count() AS count FROM plants_data WHERE url_s3 IS NONE GROUP ALL")
            .await?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.into_iter().next().map_or(0, |row| row.count))
    }
}
