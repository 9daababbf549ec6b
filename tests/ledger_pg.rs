//! Ledger properties against a real Postgres.
//!
//! These tests need a database: set `TEST_DATABASE_URL` and run with
//! `cargo test -- --ignored`. Each test creates its own rows and removes
//! them afterwards.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use inkshelf::coins::ledger::{self, CreditOutcome, LedgerError, UnlockOutcome};

async fn test_pool() -> PgPool {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a test database");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

struct Fixture {
    pool: PgPool,
    user_id: Uuid,
    story_id: Uuid,
    chapter_id: Uuid,
    initial_coins: i64,
}

impl Fixture {
    async fn new(initial_coins: i64, chapter_price: i64) -> Self {
        let pool = test_pool().await;
        let suffix = Uuid::new_v4();

        let user_id: Uuid = sqlx::query(
            r#"INSERT INTO users (email, password_hash, coins)
               VALUES ($1, 'test-hash', $2)
               RETURNING id"#,
        )
        .bind(format!("ledger_{suffix}@example.com"))
        .bind(initial_coins)
        .fetch_one(&pool)
        .await
        .expect("insert user")
        .get("id");

        let story_id: Uuid = sqlx::query(
            r#"INSERT INTO stories (title, artist_name) VALUES ($1, 'Test Artist')
               RETURNING id"#,
        )
        .bind(format!("Story {suffix}"))
        .fetch_one(&pool)
        .await
        .expect("insert story")
        .get("id");

        let chapter_id: Uuid = sqlx::query(
            r#"INSERT INTO chapters (story_id, title, position, price)
               VALUES ($1, 'Chapter 1', 1, $2)
               RETURNING id"#,
        )
        .bind(story_id)
        .bind(chapter_price)
        .fetch_one(&pool)
        .await
        .expect("insert chapter")
        .get("id");

        Self {
            pool,
            user_id,
            story_id,
            chapter_id,
            initial_coins,
        }
    }

    async fn balance(&self) -> i64 {
        sqlx::query(r#"SELECT coins FROM users WHERE id = $1"#)
            .bind(self.user_id)
            .fetch_one(&self.pool)
            .await
            .expect("select coins")
            .get("coins")
    }

    async fn ledger_sum(&self) -> i64 {
        sqlx::query(
            r#"SELECT COALESCE(SUM(amount), 0)::BIGINT AS total
               FROM coin_transactions WHERE user_id = $1"#,
        )
        .bind(self.user_id)
        .fetch_one(&self.pool)
        .await
        .expect("sum ledger")
        .get("total")
    }

    async fn ledger_rows(&self) -> i64 {
        sqlx::query(r#"SELECT COUNT(*) AS n FROM coin_transactions WHERE user_id = $1"#)
            .bind(self.user_id)
            .fetch_one(&self.pool)
            .await
            .expect("count ledger")
            .get("n")
    }

    /// The core accounting invariant.
    async fn assert_balance_reconstructible(&self) {
        assert_eq!(
            self.balance().await,
            self.initial_coins + self.ledger_sum().await
        );
    }

    async fn cleanup(self) {
        let _ = sqlx::query(r#"DELETE FROM stories WHERE id = $1"#)
            .bind(self.story_id)
            .execute(&self.pool)
            .await;
        let _ = sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(self.user_id)
            .execute(&self.pool)
            .await;
    }
}

#[tokio::test]
#[ignore = "requires Postgres; set TEST_DATABASE_URL and run with --ignored"]
async fn unlock_debits_once_and_records_ledger_row() {
    let fx = Fixture::new(50, 30).await;

    let outcome = ledger::unlock_chapter(&fx.pool, fx.user_id, fx.chapter_id)
        .await
        .expect("unlock");
    assert_eq!(outcome, UnlockOutcome::Unlocked { price: 30 });
    assert_eq!(fx.balance().await, 20);
    assert_eq!(fx.ledger_rows().await, 1);
    assert_eq!(fx.ledger_sum().await, -30);

    let unlocked: bool = sqlx::query(
        r#"SELECT EXISTS(
               SELECT 1 FROM chapter_unlocks WHERE user_id = $1 AND chapter_id = $2
           ) AS present"#,
    )
    .bind(fx.user_id)
    .bind(fx.chapter_id)
    .fetch_one(&fx.pool)
    .await
    .expect("select unlock")
    .get("present");
    assert!(unlocked);

    fx.assert_balance_reconstructible().await;
    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Postgres; set TEST_DATABASE_URL and run with --ignored"]
async fn second_unlock_is_a_noop_success() {
    let fx = Fixture::new(100, 30).await;

    let first = ledger::unlock_chapter(&fx.pool, fx.user_id, fx.chapter_id)
        .await
        .expect("first unlock");
    assert_eq!(first, UnlockOutcome::Unlocked { price: 30 });

    let second = ledger::unlock_chapter(&fx.pool, fx.user_id, fx.chapter_id)
        .await
        .expect("second unlock");
    assert_eq!(second, UnlockOutcome::AlreadyUnlocked);

    assert_eq!(fx.balance().await, 70);
    assert_eq!(fx.ledger_rows().await, 1);
    fx.assert_balance_reconstructible().await;
    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Postgres; set TEST_DATABASE_URL and run with --ignored"]
async fn insufficient_funds_leaves_no_trace() {
    let fx = Fixture::new(10, 30).await;

    let err = ledger::unlock_chapter(&fx.pool, fx.user_id, fx.chapter_id)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds));

    assert_eq!(fx.balance().await, 10);
    assert_eq!(fx.ledger_rows().await, 0);

    let unlocked: bool = sqlx::query(
        r#"SELECT EXISTS(
               SELECT 1 FROM chapter_unlocks WHERE user_id = $1 AND chapter_id = $2
           ) AS present"#,
    )
    .bind(fx.user_id)
    .bind(fx.chapter_id)
    .fetch_one(&fx.pool)
    .await
    .expect("select unlock")
    .get("present");
    assert!(!unlocked);

    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Postgres; set TEST_DATABASE_URL and run with --ignored"]
async fn free_chapter_needs_no_unlock_row() {
    let fx = Fixture::new(5, 0).await;

    let outcome = ledger::unlock_chapter(&fx.pool, fx.user_id, fx.chapter_id)
        .await
        .expect("unlock free");
    assert_eq!(outcome, UnlockOutcome::Free);
    assert_eq!(fx.balance().await, 5);
    assert_eq!(fx.ledger_rows().await, 0);

    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Postgres; set TEST_DATABASE_URL and run with --ignored"]
async fn tip_debits_and_appends_tip_row() {
    let fx = Fixture::new(40, 30).await;

    ledger::tip_artist(&fx.pool, fx.user_id, fx.story_id, 15)
        .await
        .expect("tip");
    assert_eq!(fx.balance().await, 25);

    let err = ledger::tip_artist(&fx.pool, fx.user_id, fx.story_id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount));

    fx.assert_balance_reconstructible().await;
    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Postgres; set TEST_DATABASE_URL and run with --ignored"]
async fn webhook_replay_credits_exactly_once() {
    let fx = Fixture::new(0, 30).await;
    let event_id = format!("evt_{}", Uuid::new_v4());
    let package_id = Uuid::new_v4();

    let first = ledger::credit_purchase(&fx.pool, &event_id, fx.user_id, 100, package_id)
        .await
        .expect("first credit");
    assert_eq!(first, CreditOutcome::Credited);

    let replay = ledger::credit_purchase(&fx.pool, &event_id, fx.user_id, 100, package_id)
        .await
        .expect("replayed credit");
    assert_eq!(replay, CreditOutcome::AlreadyProcessed);

    assert_eq!(fx.balance().await, 100);
    assert_eq!(fx.ledger_rows().await, 1);
    fx.assert_balance_reconstructible().await;

    let _ = sqlx::query(r#"DELETE FROM webhook_events WHERE id = $1"#)
        .bind(&event_id)
        .execute(&fx.pool)
        .await;
    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires Postgres; set TEST_DATABASE_URL and run with --ignored"]
async fn mixed_sequence_keeps_invariant() {
    let fx = Fixture::new(50, 30).await;
    let event_id = format!("evt_{}", Uuid::new_v4());

    ledger::credit_purchase(&fx.pool, &event_id, fx.user_id, 200, Uuid::new_v4())
        .await
        .expect("credit");
    ledger::unlock_chapter(&fx.pool, fx.user_id, fx.chapter_id)
        .await
        .expect("unlock");
    ledger::tip_artist(&fx.pool, fx.user_id, fx.story_id, 25)
        .await
        .expect("tip");

    assert_eq!(fx.balance().await, 50 + 200 - 30 - 25);
    fx.assert_balance_reconstructible().await;

    let _ = sqlx::query(r#"DELETE FROM webhook_events WHERE id = $1"#)
        .bind(&event_id)
        .execute(&fx.pool)
        .await;
    fx.cleanup().await;
}
