//! Route table

use axum::{
    http::Method,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::{health, memory};
use crate::engine::MemoryEngine;

/// Application state shared by all handlers
pub type AppState = Arc<MemoryEngine>;

/// Build the complete router with permissive local-development CORS
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health::health))
        .route("/containers", get(memory::list_containers))
        .route("/ingest", post(memory::ingest))
        .route("/search", post(memory::search))
        .route("/store", post(memory::store))
        .route("/clear/{tag}", delete(memory::clear))
        .route("/stats/{tag}", get(memory::stats))
        .layer(cors)
        .with_state(state)
}
