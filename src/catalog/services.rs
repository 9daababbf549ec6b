use anyhow::Context;
use sqlx::PgPool;
use std::collections::HashSet;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::catalog::repo;

#[derive(Debug, Error)]
pub enum ReorderError {
    #[error("order must list every chapter of the story exactly once")]
    NotAPermutation,
    #[error("story not found")]
    StoryNotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The requested order must contain exactly the story's chapters, each once.
/// Pure so the drag-and-drop contract is testable without a database.
pub fn validate_order(existing: &[Uuid], requested: &[Uuid]) -> Result<(), ReorderError> {
    if existing.len() != requested.len() {
        return Err(ReorderError::NotAPermutation);
    }
    let existing_set: HashSet<&Uuid> = existing.iter().collect();
    let requested_set: HashSet<&Uuid> = requested.iter().collect();
    if requested_set.len() != requested.len() || existing_set != requested_set {
        return Err(ReorderError::NotAPermutation);
    }
    Ok(())
}

/// Rewrite chapter positions to 1..n following `order`, in one transaction.
pub async fn reorder_chapters(
    db: &PgPool,
    story_id: Uuid,
    order: &[Uuid],
) -> Result<(), ReorderError> {
    if repo::get_story(db, story_id).await?.is_none() {
        return Err(ReorderError::StoryNotFound);
    }

    let existing = repo::chapter_ids_for_story(db, story_id).await?;
    validate_order(&existing, order)?;

    let mut tx = db.begin().await.context("begin tx")?;
    for (i, chapter_id) in order.iter().enumerate() {
        repo::set_chapter_position(&mut tx, *chapter_id, i as i32 + 1)
            .await
            .context("set chapter position")?;
    }
    tx.commit().await.context("commit tx")?;

    info!(%story_id, chapters = order.len(), "chapters reordered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn accepts_a_permutation() {
        let existing = ids(4);
        let mut requested = existing.clone();
        requested.swap(0, 3);
        requested.swap(1, 2);
        assert!(validate_order(&existing, &requested).is_ok());
    }

    #[test]
    fn rejects_missing_chapter() {
        let existing = ids(3);
        let requested = existing[..2].to_vec();
        assert!(matches!(
            validate_order(&existing, &requested),
            Err(ReorderError::NotAPermutation)
        ));
    }

    #[test]
    fn rejects_duplicates_even_at_same_length() {
        let existing = ids(3);
        let requested = vec![existing[0], existing[0], existing[1]];
        assert!(matches!(
            validate_order(&existing, &requested),
            Err(ReorderError::NotAPermutation)
        ));
    }

    #[test]
    fn rejects_foreign_chapter_ids() {
        let existing = ids(2);
        let requested = vec![existing[0], Uuid::new_v4()];
        assert!(matches!(
            validate_order(&existing, &requested),
            Err(ReorderError::NotAPermutation)
        ));
    }

    #[test]
    fn accepts_empty_story() {
        assert!(validate_order(&[], &[]).is_ok());
    }
}
