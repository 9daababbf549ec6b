pub mod app;
pub mod auth;
pub mod catalog;
pub mod coins;
pub mod config;
pub mod images;
pub mod payments;
pub mod retry;
pub mod state;
pub mod storage;
pub mod submissions;

pub use state::AppState;
