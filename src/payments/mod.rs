use crate::state::AppState;
use axum::{routing::post, Router};

pub mod handlers;
pub mod signature;

pub fn router() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(handlers::payment_webhook))
}
