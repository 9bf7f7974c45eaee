//! Database repository for analysis history.
//!
//! Records are inserted once and never updated. Listing never loads the stored image; it is
//! fetched separately through [`Analyses::get_image`].

use crate::analysis::AnalysisResult;
use crate::db::{
    errors::Result,
    models::analyses::{AnalysisCreateDBRequest, AnalysisDBResponse, AnalysisImageDBResponse},
};
use crate::types::{AnalysisId, UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tracing::instrument;
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, user_id, image_content_type, name, locations, benefits, care_tips, raw_response, created_at";

/// Filter for listing history records
#[derive(Debug, Clone)]
pub struct AnalysisFilter {
    pub user_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}

impl AnalysisFilter {
    pub fn new(user_id: Option<UserId>, skip: i64, limit: i64) -> Self {
        Self { user_id, skip, limit }
    }
}

#[derive(Debug, Clone, FromRow)]
struct AnalysisRecord {
    pub id: AnalysisId,
    pub user_id: UserId,
    pub image_content_type: String,
    pub name: String,
    pub locations: String,
    pub benefits: String,
    pub care_tips: String,
    pub raw_response: String,
    pub created_at: DateTime<Utc>,
}

impl From<AnalysisRecord> for AnalysisDBResponse {
    fn from(record: AnalysisRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            image_content_type: record.image_content_type,
            result: AnalysisResult {
                name: record.name,
                locations: record.locations,
                benefits: record.benefits,
                care_tips: record.care_tips,
            },
            raw_response: record.raw_response,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct StoredImage {
    pub user_id: UserId,
    pub image_content_type: String,
    pub image_base64: String,
}

pub struct Analyses<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Analyses<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), content_type = %request.image_content_type), err)]
    pub async fn create(&mut self, request: &AnalysisCreateDBRequest) -> Result<AnalysisDBResponse> {
        let record = sqlx::query_as::<_, AnalysisRecord>(&format!(
            "INSERT INTO analyses (id, user_id, image_content_type, image_base64, name, locations, benefits, care_tips, raw_response, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.image_content_type)
        .bind(&request.image_base64)
        .bind(&request.result.name)
        .bind(&request.result.locations)
        .bind(&request.result.benefits)
        .bind(&request.result.care_tips)
        .bind(&request.raw_response)
        .bind(Utc::now())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(record.into())
    }

    #[instrument(skip(self), fields(analysis_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: AnalysisId) -> Result<Option<AnalysisDBResponse>> {
        let record = sqlx::query_as::<_, AnalysisRecord>(&format!("SELECT {RECORD_COLUMNS} FROM analyses WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(record.map(Into::into))
    }

    #[instrument(skip(self), fields(analysis_id = %abbrev_uuid(&id)), err)]
    pub async fn get_image(&mut self, id: AnalysisId) -> Result<Option<AnalysisImageDBResponse>> {
        let image = sqlx::query_as::<_, StoredImage>("SELECT user_id, image_content_type, image_base64 FROM analyses WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(image.map(|image| AnalysisImageDBResponse {
            user_id: image.user_id,
            content_type: image.image_content_type,
            base64: image.image_base64,
        }))
    }

    /// History newest first, optionally restricted to one user
    #[instrument(skip(self, filter), fields(skip = filter.skip, limit = filter.limit), err)]
    pub async fn list(&mut self, filter: &AnalysisFilter) -> Result<Vec<AnalysisDBResponse>> {
        let records = sqlx::query_as::<_, AnalysisRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM analyses
             WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))
        .bind(filter.user_id)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &AnalysisFilter) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM analyses WHERE (?1 IS NULL OR user_id = ?1)")
            .bind(filter.user_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }
}
