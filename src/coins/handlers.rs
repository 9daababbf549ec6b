use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    coins::{
        dto::{BalanceResponse, Pagination, TipRequest, TransactionItem, UnlockResponse},
        ledger::{self, LedgerError, UnlockOutcome},
        repo,
    },
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/coins/balance", get(get_balance))
        .route("/coins/transactions", get(list_transactions))
        .route("/coins/packages", get(list_packages))
}

pub fn spend_routes() -> Router<AppState> {
    Router::new()
        .route("/chapters/:id/unlock", post(unlock_chapter))
        .route("/stories/:id/tip", post(tip_story))
}

#[instrument(skip(state))]
pub async fn unlock_chapter(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(chapter_id): Path<Uuid>,
) -> Result<Json<UnlockResponse>, (StatusCode, String)> {
    match ledger::unlock_chapter(&state.db, user_id, chapter_id).await {
        Ok(UnlockOutcome::Unlocked { price }) => Ok(Json(UnlockResponse {
            unlocked: true,
            debited: price,
        })),
        Ok(UnlockOutcome::AlreadyUnlocked) | Ok(UnlockOutcome::Free) => Ok(Json(UnlockResponse {
            unlocked: true,
            debited: 0,
        })),
        Err(e) => Err(ledger_error(e, user_id, "unlock")),
    }
}

#[instrument(skip(state, body))]
pub async fn tip_story(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(story_id): Path<Uuid>,
    Json(body): Json<TipRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    ledger::tip_artist(&state.db, user_id, story_id, body.amount)
        .await
        .map_err(|e| ledger_error(e, user_id, "tip"))?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_balance(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<BalanceResponse>, (StatusCode, String)> {
    let coins = repo::balance(&state.db, user_id)
        .await
        .map_err(internal(user_id, "balance"))?
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".to_string()))?;
    Ok(Json(BalanceResponse { coins }))
}

#[instrument(skip(state))]
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<TransactionItem>>, (StatusCode, String)> {
    let rows = repo::list_transactions(&state.db, user_id, p.limit, p.offset)
        .await
        .map_err(internal(user_id, "list transactions"))?;
    let items = rows
        .into_iter()
        .map(|t| TransactionItem {
            id: t.id,
            amount: t.amount,
            tx_type: t.tx_type,
            reference_id: t.reference_id,
            created_at: t.created_at,
        })
        .collect();
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn list_packages(
    State(state): State<AppState>,
) -> Result<Json<Vec<repo::CoinPackage>>, (StatusCode, String)> {
    let packages = repo::list_packages(&state.db).await.map_err(|e| {
        error!(error = %e, "list packages failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error".to_string(),
        )
    })?;
    Ok(Json(packages))
}

/// Maps ledger failures to responses. Insufficient funds is 402 so clients
/// can route the reader straight to the purchase flow.
fn ledger_error(e: LedgerError, user_id: Uuid, op: &str) -> (StatusCode, String) {
    match e {
        LedgerError::InsufficientFunds => {
            warn!(%user_id, op, "insufficient coins");
            (
                StatusCode::PAYMENT_REQUIRED,
                "Not enough coins".to_string(),
            )
        }
        LedgerError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
        LedgerError::InvalidAmount => (
            StatusCode::BAD_REQUEST,
            "Amount must be positive".to_string(),
        ),
        LedgerError::Db(e) => {
            error!(error = %e, %user_id, op, "ledger operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
        }
    }
}

fn internal(user_id: Uuid, op: &'static str) -> impl Fn(anyhow::Error) -> (StatusCode, String) {
    move |e| {
        error!(error = %e, %user_id, op, "coin query failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error".to_string(),
        )
    }
}
