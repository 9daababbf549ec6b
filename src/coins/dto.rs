use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coins::repo::TxType;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub coins: i64,
}

#[derive(Debug, Serialize)]
pub struct UnlockResponse {
    pub unlocked: bool,
    /// Coins actually debited by this call; 0 for free chapters and repeat
    /// unlocks.
    pub debited: i64,
}

#[derive(Debug, Deserialize)]
pub struct TipRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct TransactionItem {
    pub id: Uuid,
    pub amount: i64,
    pub tx_type: TxType,
    pub reference_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
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
