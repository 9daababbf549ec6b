use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use bytes::Bytes;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{AdminUser, AuthUser},
    catalog::{
        dto::{
            ChapterPagesResponse, ChapterSummary, CreateChapterRequest, CreateStoryRequest,
            PageUploadResponse, Pagination, ProgressItem, ProgressRequest, ReorderRequest,
            StoryDetails, StoryListItem,
        },
        repo,
        services::{self, ReorderError},
    },
    coins,
    images::{self, FileOutcome, UploadItem},
    retry::RetryPolicy,
    state::AppState,
};

const PAGE_URL_TTL_SECS: u64 = 10 * 60;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/stories", get(list_stories))
        .route("/stories/:id", get(get_story))
        .route("/chapters/:id/pages", get(get_chapter_pages))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/stories", post(create_story))
        .route("/stories/:id/cover", post(upload_cover))
        .route("/stories/:id/chapters", post(create_chapter))
        .route("/stories/:id/chapters/order", put(reorder_chapters))
        .route("/chapters/:id/pages", post(upload_pages))
        .route("/chapters/:id", delete(delete_chapter))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/progress", put(put_progress))
        .route("/stories/:id/progress", get(get_progress))
}

// --- reader-facing ---

#[instrument(skip(state))]
pub async fn list_stories(
    State(state): State<AppState>,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<StoryListItem>>, (StatusCode, String)> {
    let stories = repo::list_stories(&state.db, p.limit, p.offset)
        .await
        .map_err(internal("list stories"))?;
    let items = stories
        .into_iter()
        .map(|s| StoryListItem {
            id: s.id,
            title: s.title,
            artist_name: s.artist_name,
            created_at: s.created_at,
        })
        .collect();
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn get_story(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StoryDetails>, (StatusCode, String)> {
    let story = repo::get_story(&state.db, id)
        .await
        .map_err(internal("get story"))?
        .ok_or((StatusCode::NOT_FOUND, "Story not found".to_string()))?;

    let chapters = repo::chapters_for_story(&state.db, id)
        .await
        .map_err(internal("list chapters"))?;

    let cover_url = match &story.cover_key {
        Some(key) => Some(
            state
                .storage
                .presign_get(key, PAGE_URL_TTL_SECS)
                .await
                .map_err(|e| {
                    error!(error = %e, story_id = %id, "cover presign failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal error".to_string(),
                    )
                })?,
        ),
        None => None,
    };

    Ok(Json(StoryDetails {
        id: story.id,
        title: story.title,
        artist_name: story.artist_name,
        synopsis: story.synopsis,
        cover_url,
        chapters: chapters
            .into_iter()
            .map(|c| ChapterSummary {
                id: c.id,
                title: c.title,
                position: c.position,
                price: c.price,
            })
            .collect(),
    }))
}

#[instrument(skip(state))]
pub async fn get_chapter_pages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ChapterPagesResponse>, (StatusCode, String)> {
    let readable = coins::repo::is_chapter_readable(&state.db, user_id, id)
        .await
        .map_err(internal("readability check"))?
        .ok_or((StatusCode::NOT_FOUND, "Chapter not found".to_string()))?;

    if !readable {
        warn!(%user_id, chapter_id = %id, "locked chapter requested");
        return Err((
            StatusCode::PAYMENT_REQUIRED,
            "Chapter is locked".to_string(),
        ));
    }

    let pages = repo::pages_for_chapter(&state.db, id)
        .await
        .map_err(internal("list pages"))?;
    let keys = pages.into_iter().map(|p| p.s3_key).collect();
    let urls = images::services::presign_many(&state, keys, PAGE_URL_TTL_SECS)
        .await
        .map_err(|e| {
            error!(error = %e, chapter_id = %id, "page presign failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
        })?;

    Ok(Json(ChapterPagesResponse {
        chapter_id: id,
        urls,
    }))
}

// --- CMS (admin) ---

#[instrument(skip(state, payload))]
pub async fn create_story(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(payload): Json<CreateStoryRequest>,
) -> Result<(StatusCode, Json<repo::Story>), (StatusCode, String)> {
    if payload.title.trim().is_empty() || payload.artist_name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "title and artist_name are required".to_string(),
        ));
    }
    let story = repo::insert_story(
        &state.db,
        payload.title.trim(),
        payload.artist_name.trim(),
        payload.synopsis.as_deref(),
    )
    .await
    .map_err(internal("insert story"))?;
    Ok((StatusCode::CREATED, Json(story)))
}

#[instrument(skip(state, mp))]
pub async fn upload_cover(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
    mp: Multipart,
) -> Result<StatusCode, (StatusCode, String)> {
    if repo::get_story(&state.db, id)
        .await
        .map_err(internal("get story"))?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, "Story not found".to_string()));
    }

    let mut files = collect_files(mp, &["cover", "files", "files[]"]).await?;
    if files.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "cover file is required".to_string()));
    }
    files.truncate(1);

    let report = images::upload_many(
        &state,
        &format!("covers/{id}"),
        files,
        &RetryPolicy::default(),
    )
    .await;

    let Some(key) = report.stored_keys().into_iter().next() else {
        return Err((StatusCode::BAD_GATEWAY, "Cover upload failed".to_string()));
    };

    repo::set_story_cover(&state.db, id, &key)
        .await
        .map_err(internal("set story cover"))?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn create_chapter(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(story_id): Path<Uuid>,
    Json(payload): Json<CreateChapterRequest>,
) -> Result<(StatusCode, Json<repo::Chapter>), (StatusCode, String)> {
    if payload.title.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "title is required".to_string()));
    }
    if payload.price < 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "price must not be negative".to_string(),
        ));
    }
    if repo::get_story(&state.db, story_id)
        .await
        .map_err(internal("get story"))?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, "Story not found".to_string()));
    }

    let chapter = repo::insert_chapter(&state.db, story_id, payload.title.trim(), payload.price)
        .await
        .map_err(internal("insert chapter"))?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

#[instrument(skip(state, payload))]
pub async fn reorder_chapters(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(story_id): Path<Uuid>,
    Json(payload): Json<ReorderRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    match services::reorder_chapters(&state.db, story_id, &payload.chapter_ids).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(ReorderError::StoryNotFound) => {
            Err((StatusCode::NOT_FOUND, "Story not found".to_string()))
        }
        Err(e @ ReorderError::NotAPermutation) => {
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(ReorderError::Other(e)) => {
            error!(error = %e, %story_id, "reorder failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ))
        }
    }
}

/// Multipart `files[]` upload for chapter pages. Each file runs its own
/// retry loop; the response reports per-file outcomes so a client can offer
/// retries for the ones that failed.
#[instrument(skip(state, mp))]
pub async fn upload_pages(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(chapter_id): Path<Uuid>,
    mp: Multipart,
) -> Result<(StatusCode, Json<PageUploadResponse>), (StatusCode, String)> {
    if repo::get_chapter(&state.db, chapter_id)
        .await
        .map_err(internal("get chapter"))?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, "Chapter not found".to_string()));
    }

    let files = collect_files(mp, &["files", "files[]"]).await?;
    if files.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "files[] is required".to_string()));
    }

    let report = images::upload_many(
        &state,
        &format!("pages/{chapter_id}"),
        files,
        &RetryPolicy::default(),
    )
    .await;

    if report.all_failed() {
        return Err((StatusCode::BAD_GATEWAY, "All uploads failed".to_string()));
    }

    let keys = report.stored_keys();
    let page_ids = repo::append_pages(&state.db, chapter_id, &keys)
        .await
        .map_err(internal("append pages"))?;

    let errors: Vec<String> = report
        .outcomes
        .iter()
        .filter_map(|o| match o {
            FileOutcome::Failed { error, .. } => Some(error.clone()),
            FileOutcome::Stored { .. } => None,
        })
        .collect();

    let stored = report.stored_count();
    let failed = errors.len();
    let status = if failed > 0 {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(PageUploadResponse {
            page_ids,
            stored,
            failed,
            errors,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_chapter(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let deleted = repo::delete_chapter(&state.db, id)
        .await
        .map_err(internal("delete chapter"))?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "Chapter not found".to_string()))
    }
}

// --- reading progress ---

#[instrument(skip(state, payload))]
pub async fn put_progress(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ProgressRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    if payload.page < 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "page must not be negative".to_string(),
        ));
    }
    if repo::get_chapter(&state.db, payload.chapter_id)
        .await
        .map_err(internal("get chapter"))?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, "Chapter not found".to_string()));
    }

    repo::upsert_progress(&state.db, user_id, payload.chapter_id, payload.page)
        .await
        .map_err(internal("upsert progress"))?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_progress(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(story_id): Path<Uuid>,
) -> Result<Json<Vec<ProgressItem>>, (StatusCode, String)> {
    let rows = repo::progress_for_story(&state.db, user_id, story_id)
        .await
        .map_err(internal("progress for story"))?;
    let items = rows
        .into_iter()
        .map(|p| ProgressItem {
            chapter_id: p.chapter_id,
            page: p.page,
            updated_at: p.updated_at,
        })
        .collect();
    Ok(Json(items))
}

// --- helpers ---

async fn collect_files(
    mut mp: Multipart,
    field_names: &[&str],
) -> Result<Vec<UploadItem>, (StatusCode, String)> {
    let mut files = Vec::new();
    while let Ok(Some(field)) = mp.next_field().await {
        let name = field.name().map(|s| s.to_string());
        if name
            .as_deref()
            .map(|n| field_names.contains(&n))
            .unwrap_or(false)
        {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let data: Bytes = field.bytes().await.map_err(|e| {
                warn!(error = %e, "multipart read failed");
                (StatusCode::BAD_REQUEST, "Malformed upload".to_string())
            })?;
            files.push(UploadItem {
                body: data,
                content_type,
            });
        }
    }
    Ok(files)
}

fn internal(op: &'static str) -> impl Fn(anyhow::Error) -> (StatusCode, String) {
    move |e| {
        error!(error = %e, op, "catalog operation failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error".to_string(),
        )
    }
}
