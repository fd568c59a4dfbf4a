mod webhook;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/event_handler", post(webhook::webhook))
        .route("/health", get(health))
}

async fn health() -> &'static str { "OK" }
