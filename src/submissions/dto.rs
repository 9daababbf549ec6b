use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::submissions::repo::SubmissionStatus;

#[derive(Debug, Serialize)]
pub struct SubmissionCreatedResponse {
    pub id: Uuid,
    pub samples_stored: usize,
    pub samples_failed: usize,
    /// Per-file error messages for failed samples, in upload order.
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionListItem {
    pub id: Uuid,
    pub artist_name: String,
    pub email: String,
    pub title: String,
    pub synopsis: Option<String>,
    pub sample_count: usize,
    pub status: SubmissionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionFilter {
    #[serde(default)]
    pub status: Option<SubmissionStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}
