use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Story {
    pub id: Uuid,
    pub title: String,
    pub artist_name: String,
    pub synopsis: Option<String>,
    pub cover_key: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chapter {
    pub id: Uuid,
    pub story_id: Uuid,
    pub title: String,
    pub position: i32,
    /// Coin price; 0 means free for everyone.
    pub price: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Page {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub position: i32,
    pub s3_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReadingProgress {
    pub chapter_id: Uuid,
    pub page: i32,
    pub updated_at: OffsetDateTime,
}

pub async fn list_stories(db: &PgPool, limit: i64, offset: i64) -> anyhow::Result<Vec<Story>> {
    let rows = sqlx::query_as::<_, Story>(
        r#"
        SELECT id, title, artist_name, synopsis, cover_key, created_at
        FROM stories
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("list stories")?;
    Ok(rows)
}

pub async fn get_story(db: &PgPool, story_id: Uuid) -> anyhow::Result<Option<Story>> {
    let row = sqlx::query_as::<_, Story>(
        r#"
        SELECT id, title, artist_name, synopsis, cover_key, created_at
        FROM stories
        WHERE id = $1
        "#,
    )
    .bind(story_id)
    .fetch_optional(db)
    .await
    .context("get story")?;
    Ok(row)
}

pub async fn insert_story(
    db: &PgPool,
    title: &str,
    artist_name: &str,
    synopsis: Option<&str>,
) -> anyhow::Result<Story> {
    let row = sqlx::query_as::<_, Story>(
        r#"
        INSERT INTO stories (title, artist_name, synopsis)
        VALUES ($1, $2, $3)
        RETURNING id, title, artist_name, synopsis, cover_key, created_at
        "#,
    )
    .bind(title)
    .bind(artist_name)
    .bind(synopsis)
    .fetch_one(db)
    .await
    .context("insert story")?;
    Ok(row)
}

pub async fn set_story_cover(db: &PgPool, story_id: Uuid, cover_key: &str) -> anyhow::Result<bool> {
    let updated = sqlx::query(r#"UPDATE stories SET cover_key = $2 WHERE id = $1"#)
        .bind(story_id)
        .bind(cover_key)
        .execute(db)
        .await
        .context("set story cover")?
        .rows_affected();
    Ok(updated > 0)
}

pub async fn chapters_for_story(db: &PgPool, story_id: Uuid) -> anyhow::Result<Vec<Chapter>> {
    let rows = sqlx::query_as::<_, Chapter>(
        r#"
        SELECT id, story_id, title, position, price, created_at
        FROM chapters
        WHERE story_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(story_id)
    .fetch_all(db)
    .await
    .context("list chapters")?;
    Ok(rows)
}

pub async fn get_chapter(db: &PgPool, chapter_id: Uuid) -> anyhow::Result<Option<Chapter>> {
    let row = sqlx::query_as::<_, Chapter>(
        r#"
        SELECT id, story_id, title, position, price, created_at
        FROM chapters
        WHERE id = $1
        "#,
    )
    .bind(chapter_id)
    .fetch_optional(db)
    .await
    .context("get chapter")?;
    Ok(row)
}

/// Append a chapter at the end of the story.
pub async fn insert_chapter(
    db: &PgPool,
    story_id: Uuid,
    title: &str,
    price: i64,
) -> anyhow::Result<Chapter> {
    let row = sqlx::query_as::<_, Chapter>(
        r#"
        INSERT INTO chapters (story_id, title, position, price)
        VALUES (
            $1, $2,
            COALESCE((SELECT MAX(position) FROM chapters WHERE story_id = $1), 0) + 1,
            $3
        )
        RETURNING id, story_id, title, position, price, created_at
        "#,
    )
    .bind(story_id)
    .bind(title)
    .bind(price)
    .fetch_one(db)
    .await
    .context("insert chapter")?;
    Ok(row)
}

pub async fn delete_chapter(db: &PgPool, chapter_id: Uuid) -> anyhow::Result<bool> {
    let deleted = sqlx::query(r#"DELETE FROM chapters WHERE id = $1"#)
        .bind(chapter_id)
        .execute(db)
        .await
        .context("delete chapter")?
        .rows_affected();
    Ok(deleted > 0)
}

pub async fn chapter_ids_for_story(db: &PgPool, story_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
    let rows = sqlx::query_as::<_, (Uuid,)>(
        r#"SELECT id FROM chapters WHERE story_id = $1 ORDER BY position ASC"#,
    )
    .bind(story_id)
    .fetch_all(db)
    .await
    .context("chapter ids for story")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn set_chapter_position(
    tx: &mut Transaction<'_, Postgres>,
    chapter_id: Uuid,
    position: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE chapters SET position = $2 WHERE id = $1"#)
        .bind(chapter_id)
        .bind(position)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn pages_for_chapter(db: &PgPool, chapter_id: Uuid) -> anyhow::Result<Vec<Page>> {
    let rows = sqlx::query_as::<_, Page>(
        r#"
        SELECT id, chapter_id, position, s3_key
        FROM pages
        WHERE chapter_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(chapter_id)
    .fetch_all(db)
    .await
    .context("list pages")?;
    Ok(rows)
}

/// Append pages after the current last position, inside one transaction so a
/// multi-file upload links all-or-nothing.
pub async fn append_pages(
    db: &PgPool,
    chapter_id: Uuid,
    keys: &[String],
) -> anyhow::Result<Vec<Uuid>> {
    let mut tx = db.begin().await.context("begin tx")?;

    let (start,): (i32,) = sqlx::query_as(
        r#"SELECT COALESCE(MAX(position), 0) FROM pages WHERE chapter_id = $1"#,
    )
    .bind(chapter_id)
    .fetch_one(&mut *tx)
    .await
    .context("max page position")?;

    let mut ids = Vec::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO pages (chapter_id, position, s3_key)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(chapter_id)
        .bind(start + 1 + i as i32)
        .bind(key)
        .fetch_one(&mut *tx)
        .await
        .context("insert page")?;
        ids.push(id);
    }

    tx.commit().await.context("commit tx")?;
    Ok(ids)
}

pub async fn upsert_progress(
    db: &PgPool,
    user_id: Uuid,
    chapter_id: Uuid,
    page: i32,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reading_progress (user_id, chapter_id, page)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, chapter_id)
        DO UPDATE SET page = EXCLUDED.page, updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(chapter_id)
    .bind(page)
    .execute(db)
    .await
    .context("upsert progress")?;
    Ok(())
}

pub async fn progress_for_story(
    db: &PgPool,
    user_id: Uuid,
    story_id: Uuid,
) -> anyhow::Result<Vec<ReadingProgress>> {
    let rows = sqlx::query_as::<_, ReadingProgress>(
        r#"
        SELECT p.chapter_id, p.page, p.updated_at
        FROM reading_progress p
        JOIN chapters c ON c.id = p.chapter_id
        WHERE p.user_id = $1 AND c.story_id = $2
        ORDER BY c.position ASC
        "#,
    )
    .bind(user_id)
    .bind(story_id)
    .fetch_all(db)
    .await
    .context("progress for story")?;
    Ok(rows)
}
