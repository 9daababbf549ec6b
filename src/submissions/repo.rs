use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Review state stored as TEXT in the database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Submission {
    pub id: Uuid,
    pub artist_name: String,
    pub email: String,
    pub title: String,
    pub synopsis: Option<String>,
    pub sample_keys: Vec<String>,
    pub status: SubmissionStatus,
    pub created_at: OffsetDateTime,
    pub reviewed_at: Option<OffsetDateTime>,
}

pub async fn insert(
    db: &PgPool,
    artist_name: &str,
    email: &str,
    title: &str,
    synopsis: Option<&str>,
    sample_keys: &[String],
) -> anyhow::Result<Submission> {
    let row = sqlx::query_as::<_, Submission>(
        r#"
        INSERT INTO submissions (artist_name, email, title, synopsis, sample_keys)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, artist_name, email, title, synopsis, sample_keys,
                  status, created_at, reviewed_at
        "#,
    )
    .bind(artist_name)
    .bind(email)
    .bind(title)
    .bind(synopsis)
    .bind(sample_keys)
    .fetch_one(db)
    .await
    .context("insert submission")?;
    Ok(row)
}

pub async fn list_by_status(
    db: &PgPool,
    status: Option<SubmissionStatus>,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<Submission>> {
    let rows = sqlx::query_as::<_, Submission>(
        r#"
        SELECT id, artist_name, email, title, synopsis, sample_keys,
               status, created_at, reviewed_at
        FROM submissions
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at ASC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("list submissions")?;
    Ok(rows)
}

/// Move a pending submission to its reviewed state. Returns false when the
/// submission is missing or was already reviewed; decisions are final.
pub async fn review(
    db: &PgPool,
    submission_id: Uuid,
    decision: SubmissionStatus,
) -> anyhow::Result<bool> {
    let updated = sqlx::query(
        r#"
        UPDATE submissions
        SET status = $2, reviewed_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(submission_id)
    .bind(decision)
    .execute(db)
    .await
    .context("review submission")?
    .rows_affected();
    Ok(updated > 0)
}
