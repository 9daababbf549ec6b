use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

/// Ledger entry type stored as TEXT in the database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Purchase,
    Unlock,
    Tip,
}

/// Immutable ledger entry. Rows are only ever appended; the user's balance
/// must always equal the signup grant plus the sum of `amount` here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CoinTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub tx_type: TxType,
    pub reference_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// Purchasable coin bundle shown in the buy flow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CoinPackage {
    pub id: Uuid,
    pub name: String,
    pub coins: i64,
    pub price_cents: i32,
    pub active: bool,
}

/// Append a ledger row inside an open transaction. Callers are responsible
/// for mutating the balance in the same transaction.
pub async fn insert_ledger_entry(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    amount: i64,
    tx_type: TxType,
    reference_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO coin_transactions (user_id, amount, tx_type, reference_id)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .bind(tx_type)
    .bind(reference_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn balance(db: &PgPool, user_id: Uuid) -> anyhow::Result<Option<i64>> {
    let row = sqlx::query_as::<_, (i64,)>(r#"SELECT coins FROM users WHERE id = $1"#)
        .bind(user_id)
        .fetch_optional(db)
        .await
        .context("load balance")?;
    Ok(row.map(|(coins,)| coins))
}

pub async fn list_transactions(
    db: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<CoinTransaction>> {
    let rows = sqlx::query_as::<_, CoinTransaction>(
        r#"
        SELECT id, user_id, amount, tx_type, reference_id, created_at
        FROM coin_transactions
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("list transactions")?;
    Ok(rows)
}

pub async fn list_packages(db: &PgPool) -> anyhow::Result<Vec<CoinPackage>> {
    let rows = sqlx::query_as::<_, CoinPackage>(
        r#"
        SELECT id, name, coins, price_cents, active
        FROM coin_packages
        WHERE active = true
        ORDER BY coins ASC
        "#,
    )
    .fetch_all(db)
    .await
    .context("list packages")?;
    Ok(rows)
}

/// Whether `user_id` may read `chapter_id`: the chapter is free, the user has
/// paid for it, or the user is an admin.
pub async fn is_chapter_readable(
    db: &PgPool,
    user_id: Uuid,
    chapter_id: Uuid,
) -> anyhow::Result<Option<bool>> {
    let row = sqlx::query_as::<_, (bool,)>(
        r#"
        SELECT c.price = 0
               OR EXISTS (
                   SELECT 1 FROM chapter_unlocks u
                   WHERE u.user_id = $2 AND u.chapter_id = c.id
               )
               OR EXISTS (
                   SELECT 1 FROM users usr
                   WHERE usr.id = $2 AND usr.role = 'admin'
               )
        FROM chapters c
        WHERE c.id = $1
        "#,
    )
    .bind(chapter_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("chapter readability check")?;
    Ok(row.map(|(ok,)| ok))
}
