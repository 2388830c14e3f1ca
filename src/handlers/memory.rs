//! Handlers for ingest, search, store, and container management

use axum::extract::{Path, State};
use axum::response::Json;
use tracing::warn;

use super::types::{
    ContainersResponse, IngestRequest, IngestResponse, OkResponse, SearchRequest, SearchResponse,
    StoreRequest,
};
use super::AppState;
use crate::errors::{EngineError, Result};
use crate::types::IngestSession;
use crate::validation;

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// GET /containers
pub async fn list_containers(State(state): State<AppState>) -> Result<Json<ContainersResponse>> {
    let containers = state.list_containers().map_err(EngineError::classify)?;
    Ok(Json(ContainersResponse { containers }))
}

/// POST /ingest
pub async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>> {
    validation::validate_container_tag(&req.container_tag)
        .map_err(|e| EngineError::invalid("containerTag", e.to_string()))?;
    validation::validate_session_id(&req.session_id)
        .map_err(|e| EngineError::invalid("sessionId", e.to_string()))?;
    if req.messages.is_empty() {
        return Err(EngineError::invalid("messages", "must be non-empty"));
    }
    if let Some(date) = &req.date {
        validation::validate_date(date)
            .map_err(|e| EngineError::invalid("date", e.to_string()))?;
    }

    let session = IngestSession {
        session_id: req.session_id,
        turns: req.messages,
        date: req.date,
    };

    let outcome = state
        .ingest(&req.container_tag, vec![session])
        .await
        .map_err(EngineError::classify)?;

    if !outcome.failed_sessions.is_empty() {
        warn!(
            container = %req.container_tag,
            "ingest skipped sessions: {}",
            outcome.failed_sessions.join(", ")
        );
    }

    Ok(Json(IngestResponse {
        document_ids: outcome.document_ids,
    }))
}

/// POST /search
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    validation::validate_container_tag(&req.container_tag)
        .map_err(|e| EngineError::invalid("containerTag", e.to_string()))?;
    validation::validate_query(&req.query)
        .map_err(|e| EngineError::invalid("query", e.to_string()))?;

    let limit = req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    validation::validate_limit(limit)
        .map_err(|e| EngineError::invalid("limit", e.to_string()))?;

    let results = state
        .search(&req.container_tag, &req.query, limit)
        .await
        .map_err(EngineError::classify)?;

    Ok(Json(SearchResponse { results }))
}

/// POST /store
pub async fn store(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> Result<Json<OkResponse>> {
    validation::validate_container_tag(&req.container_tag)
        .map_err(|e| EngineError::invalid("containerTag", e.to_string()))?;
    if req.text.trim().is_empty() {
        return Err(EngineError::invalid("text", "must be non-empty"));
    }

    state
        .store_text(&req.container_tag, &req.text)
        .await
        .map_err(EngineError::classify)?;

    Ok(Json(OkResponse { ok: true }))
}

/// DELETE /clear/:tag
pub async fn clear(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<OkResponse>> {
    validation::validate_container_tag(&tag)
        .map_err(|e| EngineError::invalid("containerTag", e.to_string()))?;

    state.clear_container(&tag).map_err(EngineError::classify)?;
    Ok(Json(OkResponse { ok: true }))
}

/// GET /stats/:tag
pub async fn stats(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<crate::container::ContainerStats>> {
    validation::validate_container_tag(&tag)
        .map_err(|e| EngineError::invalid("containerTag", e.to_string()))?;

    let stats = state
        .container_stats(&tag)
        .await
        .map_err(EngineError::classify)?;
    Ok(Json(stats))
}
