use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod ledger;
pub mod repo;

pub use ledger::{LedgerError, UnlockOutcome};
pub use repo::TxType;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::read_routes())
        .merge(handlers::spend_routes())
}
