//! Database models for analysis history records.

use crate::analysis::AnalysisResult;
use crate::types::{AnalysisId, UserId};
use chrono::{DateTime, Utc};

/// Database request for storing one completed analysis
#[derive(Debug, Clone)]
pub struct AnalysisCreateDBRequest {
    pub user_id: UserId,
    pub image_content_type: String,
    pub image_base64: String,
    pub result: AnalysisResult,
    pub raw_response: String,
}

/// A full history record, including the raw model output
#[derive(Debug, Clone)]
pub struct AnalysisDBResponse {
    pub id: AnalysisId,
    pub user_id: UserId,
    pub image_content_type: String,
    pub result: AnalysisResult,
    pub raw_response: String,
    pub created_at: DateTime<Utc>,
}

/// Stored source image of a history record
#[derive(Debug, Clone)]
pub struct AnalysisImageDBResponse {
    pub user_id: UserId,
    pub content_type: String,
    pub base64: String,
}
