use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod repo;

pub use repo::SubmissionStatus;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::intake_routes())
        .merge(handlers::review_routes())
}
