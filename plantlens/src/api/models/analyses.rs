//! API request/response models for plant analyses.

use super::pagination::Pagination;
use crate::analysis::AnalysisResult;
use crate::db::models::analyses::AnalysisDBResponse;
use crate::types::{AnalysisId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Multipart body for `POST /analyses`. Only used to document the endpoint.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct AnalysisUpload {
    /// The plant photo
    #[schema(value_type = String, format = Binary)]
    pub image: Vec<u8>,
}

/// Result of a fresh analysis, returned once the credit has been debited
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalysisResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: AnalysisId,
    #[serde(flatten)]
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
    /// Credit balance after this analysis was paid for
    pub balance: i64,
}

/// One entry of the analysis history
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalysisSummary {
    #[schema(value_type = String, format = "uuid")]
    pub id: AnalysisId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[serde(flatten)]
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

/// A single history record with the model's unparsed answer
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalysisDetail {
    #[schema(value_type = String, format = "uuid")]
    pub id: AnalysisId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[serde(flatten)]
    pub result: AnalysisResult,
    pub raw_response: String,
    pub image_content_type: String,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for listing analyses
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListAnalysesQuery {
    /// Filter by user ID (admins only for other users)
    #[param(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,

    /// Pagination parameters
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}

impl AnalysisResponse {
    pub fn new(record: AnalysisDBResponse, balance: i64) -> Self {
        Self {
            id: record.id,
            result: record.result,
            created_at: record.created_at,
            balance,
        }
    }
}

impl From<AnalysisDBResponse> for AnalysisSummary {
    fn from(record: AnalysisDBResponse) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            result: record.result,
            created_at: record.created_at,
        }
    }
}

impl From<AnalysisDBResponse> for AnalysisDetail {
    fn from(record: AnalysisDBResponse) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            result: record.result,
            raw_response: record.raw_response,
            image_content_type: record.image_content_type,
            created_at: record.created_at,
        }
    }
}
