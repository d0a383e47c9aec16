// API module - HTTP endpoints

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::services::LifecycleService;

pub mod health;
pub mod middleware;
pub mod promo;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleService>,
}

impl AppState {
    pub fn new(lifecycle: LifecycleService) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
        }
    }
}

/// All routes, without transport layers (tracing, CORS) applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(promo::router())
        .with_state(state)
}
