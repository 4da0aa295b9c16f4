// HTTP API: marketplace install flow and custom-value proxy

mod error;
pub mod auth;
pub mod custom_values;

pub use auth::create_auth_router;
pub use custom_values::create_custom_values_router;
pub use error::AppError;

use crate::manager::Upstream;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared application state for all API routers
#[derive(Clone)]
pub struct AppState {
    pub upstream: Upstream,
    /// Marketplace URL the install route redirects to
    pub install_url: String,
}

/// Builds the full API router.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/health", get(health))
        .merge(create_auth_router(Arc::clone(&state)))
        .merge(create_custom_values_router(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
