use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AdminUser,
    images::{self, FileOutcome, UploadItem},
    retry::RetryPolicy,
    state::AppState,
    submissions::{
        dto::{
            ReviewDecision, ReviewRequest, SubmissionCreatedResponse, SubmissionFilter,
            SubmissionListItem,
        },
        repo::{self, SubmissionStatus},
    },
};

const MAX_SAMPLES: usize = 5;

pub fn intake_routes() -> Router<AppState> {
    Router::new()
        .route("/submissions", post(create_submission))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/submissions", get(list_submissions))
        .route("/submissions/:id/review", post(review_submission))
}

/// Public intake form: text fields plus up to five `samples[]` image files.
/// Sample uploads go through the retry pipeline; the submission is accepted
/// as long as at least one sample survives.
#[instrument(skip(state, mp))]
pub async fn create_submission(
    State(state): State<AppState>,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<SubmissionCreatedResponse>), (StatusCode, String)> {
    let mut artist_name = None;
    let mut email = None;
    let mut title = None;
    let mut synopsis = None;
    let mut samples: Vec<UploadItem> = Vec::new();

    while let Ok(Some(field)) = mp.next_field().await {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("artist_name") => artist_name = field.text().await.ok(),
            Some("email") => email = field.text().await.ok(),
            Some("title") => title = field.text().await.ok(),
            Some("synopsis") => synopsis = field.text().await.ok(),
            Some("samples") | Some("samples[]") => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data = field.bytes().await.map_err(|e| {
                    warn!(error = %e, "multipart read failed");
                    (StatusCode::BAD_REQUEST, "Malformed upload".to_string())
                })?;
                samples.push(UploadItem {
                    body: data,
                    content_type,
                });
            }
            _ => {}
        }
    }

    let artist_name = require_text(artist_name, "artist_name")?;
    let email = require_text(email, "email")?;
    let title = require_text(title, "title")?;

    if !crate::auth::services::is_valid_email(&email) {
        return Err((StatusCode::BAD_REQUEST, "Invalid email".to_string()));
    }
    if samples.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "samples[] is required".to_string(),
        ));
    }
    if samples.len() > MAX_SAMPLES {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("at most {MAX_SAMPLES} samples allowed"),
        ));
    }

    let report = images::upload_many(
        &state,
        &format!("submissions/{}", Uuid::new_v4()),
        samples,
        &RetryPolicy::default(),
    )
    .await;

    if report.all_failed() {
        error!(artist = %artist_name, "all sample uploads failed");
        return Err((
            StatusCode::BAD_GATEWAY,
            "Sample upload failed, please retry".to_string(),
        ));
    }

    let keys = report.stored_keys();
    let submission = repo::insert(
        &state.db,
        artist_name.trim(),
        email.trim(),
        title.trim(),
        synopsis.as_deref().filter(|s| !s.trim().is_empty()),
        &keys,
    )
    .await
    .map_err(|e| {
        error!(error = %e, "insert submission failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error".to_string(),
        )
    })?;

    let errors: Vec<String> = report
        .outcomes
        .iter()
        .filter_map(|o| match o {
            FileOutcome::Failed { error, .. } => Some(error.clone()),
            FileOutcome::Stored { .. } => None,
        })
        .collect();

    info!(submission_id = %submission.id, artist = %submission.artist_name,
          stored = keys.len(), failed = errors.len(), "submission received");

    Ok((
        StatusCode::CREATED,
        Json(SubmissionCreatedResponse {
            id: submission.id,
            samples_stored: keys.len(),
            samples_failed: errors.len(),
            errors,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn list_submissions(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(filter): Query<SubmissionFilter>,
) -> Result<Json<Vec<SubmissionListItem>>, (StatusCode, String)> {
    let rows = repo::list_by_status(&state.db, filter.status, filter.limit, filter.offset)
        .await
        .map_err(|e| {
            error!(error = %e, "list submissions failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
        })?;

    let items = rows
        .into_iter()
        .map(|s| SubmissionListItem {
            id: s.id,
            artist_name: s.artist_name,
            email: s.email,
            title: s.title,
            synopsis: s.synopsis,
            sample_count: s.sample_keys.len(),
            status: s.status,
            created_at: s.created_at,
        })
        .collect();
    Ok(Json(items))
}

#[instrument(skip(state, payload))]
pub async fn review_submission(
    State(state): State<AppState>,
    AdminUser(admin_id): AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let decision = match payload.decision {
        ReviewDecision::Approve => SubmissionStatus::Approved,
        ReviewDecision::Reject => SubmissionStatus::Rejected,
    };

    let updated = repo::review(&state.db, id, decision).await.map_err(|e| {
        error!(error = %e, submission_id = %id, "review failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error".to_string(),
        )
    })?;

    if !updated {
        return Err((
            StatusCode::CONFLICT,
            "Submission missing or already reviewed".to_string(),
        ));
    }

    info!(submission_id = %id, %admin_id, decision = ?decision, "submission reviewed");
    Ok(StatusCode::NO_CONTENT)
}

fn require_text(
    value: Option<String>,
    field: &'static str,
) -> Result<String, (StatusCode, String)> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err((StatusCode::BAD_REQUEST, format!("{field} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_text_rejects_missing_and_blank() {
        assert!(require_text(None, "title").is_err());
        assert!(require_text(Some("   ".into()), "title").is_err());
        assert_eq!(require_text(Some("ok".into()), "title").unwrap(), "ok");
    }

    #[test]
    fn review_decision_parses_lowercase() {
        let req: ReviewRequest = serde_json::from_str(r#"{"decision":"approve"}"#).unwrap();
        assert_eq!(req.decision, ReviewDecision::Approve);
        let req: ReviewRequest = serde_json::from_str(r#"{"decision":"reject"}"#).unwrap();
        assert_eq!(req.decision, ReviewDecision::Reject);
        assert!(serde_json::from_str::<ReviewRequest>(r#"{"decision":"maybe"}"#).is_err());
    }
}
