use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct StoryListItem {
    pub id: Uuid,
    pub title: String,
    pub artist_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct ChapterSummary {
    pub id: Uuid,
    pub title: String,
    pub position: i32,
    pub price: i64,
}

#[derive(Debug, Serialize)]
pub struct StoryDetails {
    pub id: Uuid,
    pub title: String,
    pub artist_name: String,
    pub synopsis: Option<String>,
    pub cover_url: Option<String>,
    pub chapters: Vec<ChapterSummary>,
}

#[derive(Debug, Deserialize)]
pub struct CreateStoryRequest {
    pub title: String,
    pub artist_name: String,
    #[serde(default)]
    pub synopsis: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChapterRequest {
    pub title: String,
    #[serde(default)]
    pub price: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub chapter_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PageUploadResponse {
    pub page_ids: Vec<Uuid>,
    pub stored: usize,
    pub failed: usize,
    /// Per-file error messages for the failed uploads, in request order.
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChapterPagesResponse {
    pub chapter_id: Uuid,
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub chapter_id: Uuid,
    pub page: i32,
}

#[derive(Debug, Serialize)]
pub struct ProgressItem {
    pub chapter_id: Uuid,
    pub page: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}
