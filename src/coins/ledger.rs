//! Coin ledger mutations.
//!
//! Every balance change happens inside a single database transaction that
//! also appends the matching `coin_transactions` row, so a debit without a
//! ledger entry (or the reverse) cannot be observed even across a crash.
//! The debit itself is a conditional `UPDATE ... WHERE coins >= price`:
//! two concurrent unlocks cannot both pass the balance check, because the
//! check and the write are one statement.

use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::coins::repo::{self, TxType};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient coins")]
    InsufficientFunds,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("amount must be positive")]
    InvalidAmount,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Coins were debited and the unlock recorded.
    Unlocked { price: i64 },
    /// The user had already paid for this chapter; nothing was written.
    AlreadyUnlocked,
    /// The chapter is free; no unlock record is needed.
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited,
    /// The external event id was seen before; nothing was written.
    AlreadyProcessed,
}

/// Unlock a chapter for a user. Idempotent: a second call for the same
/// chapter succeeds without a second debit.
pub async fn unlock_chapter(
    db: &PgPool,
    user_id: Uuid,
    chapter_id: Uuid,
) -> Result<UnlockOutcome, LedgerError> {
    let mut tx = db.begin().await?;

    let chapter = sqlx::query_as::<_, (i64,)>(r#"SELECT price FROM chapters WHERE id = $1"#)
        .bind(chapter_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some((price,)) = chapter else {
        return Err(LedgerError::NotFound("chapter"));
    };
    if price == 0 {
        return Ok(UnlockOutcome::Free);
    }

    // Recording the unlock first makes "already unlocked" visible before any
    // money moves; the ON CONFLICT no-op is the idempotence check.
    let inserted = sqlx::query(
        r#"
        INSERT INTO chapter_unlocks (user_id, chapter_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(chapter_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if inserted == 0 {
        // Dropping `tx` rolls back the (empty) transaction.
        return Ok(UnlockOutcome::AlreadyUnlocked);
    }

    debit(&mut tx, user_id, price).await?;
    repo::insert_ledger_entry(&mut tx, user_id, -price, TxType::Unlock, Some(chapter_id)).await?;

    tx.commit().await?;
    info!(%user_id, %chapter_id, price, "chapter unlocked");
    Ok(UnlockOutcome::Unlocked { price })
}

/// Tip the artist of a story. Not idempotent: every call is a new tip.
pub async fn tip_artist(
    db: &PgPool,
    user_id: Uuid,
    story_id: Uuid,
    amount: i64,
) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount);
    }

    let mut tx = db.begin().await?;

    let story = sqlx::query_as::<_, (Uuid,)>(r#"SELECT id FROM stories WHERE id = $1"#)
        .bind(story_id)
        .fetch_optional(&mut *tx)
        .await?;
    if story.is_none() {
        return Err(LedgerError::NotFound("story"));
    }

    debit(&mut tx, user_id, amount).await?;
    repo::insert_ledger_entry(&mut tx, user_id, -amount, TxType::Tip, Some(story_id)).await?;

    tx.commit().await?;
    info!(%user_id, %story_id, amount, "artist tipped");
    Ok(())
}

/// Credit a completed coin purchase, keyed on the payment processor's event
/// id so redelivered webhooks cannot double-credit.
pub async fn credit_purchase(
    db: &PgPool,
    event_id: &str,
    user_id: Uuid,
    coins: i64,
    package_id: Uuid,
) -> Result<CreditOutcome, LedgerError> {
    if coins <= 0 {
        return Err(LedgerError::InvalidAmount);
    }

    let mut tx = db.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO webhook_events (id)
        VALUES ($1)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(event_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if inserted == 0 {
        return Ok(CreditOutcome::AlreadyProcessed);
    }

    let credited = sqlx::query(r#"UPDATE users SET coins = coins + $2 WHERE id = $1"#)
        .bind(user_id)
        .bind(coins)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if credited == 0 {
        return Err(LedgerError::NotFound("user"));
    }

    repo::insert_ledger_entry(&mut tx, user_id, coins, TxType::Purchase, Some(package_id)).await?;

    tx.commit().await?;
    info!(%user_id, event_id, coins, %package_id, "purchase credited");
    Ok(CreditOutcome::Credited)
}

/// Conditional atomic debit. Zero rows affected means either the user does
/// not exist or the balance is short of `cost`.
async fn debit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    cost: i64,
) -> Result<(), LedgerError> {
    let debited = sqlx::query(
        r#"UPDATE users SET coins = coins - $2 WHERE id = $1 AND coins >= $2"#,
    )
    .bind(user_id)
    .bind(cost)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if debited == 0 {
        let exists = sqlx::query_as::<_, (i64,)>(r#"SELECT coins FROM users WHERE id = $1"#)
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        return Err(match exists {
            Some(_) => LedgerError::InsufficientFunds,
            None => LedgerError::NotFound("user"),
        });
    }
    Ok(())
}
