//! Error types for the retrieval engine
//!
//! Internal code propagates `anyhow::Error`; the HTTP boundary converts into
//! `EngineError`, which carries a machine-readable code and maps onto a
//! status. Bodies are `{error, code}` so callers can branch on either.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error body returned to HTTP callers
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message
    pub error: String,
    /// Machine-readable error code
    pub code: String,
}

/// Engine error kinds
#[derive(Debug)]
pub enum EngineError {
    /// Malformed request (400-visible, message surfaces verbatim)
    InvalidRequest { field: String, reason: String },

    /// Internal misuse: a component was used before initialization
    NotInitialized(String),

    /// Embedder / LLM / database unreachable after retries
    ExternalUnavailable(String),

    /// A snapshot file failed to parse; treated as missing by the loader,
    /// surfaced only if nothing else can serve the request
    PersistenceCorrupt { path: String, details: String },

    /// Per-session extraction failures during an ingest batch; the ingest
    /// still returns the ids that succeeded
    Partial { failed_sessions: Vec<String> },

    /// Generic wrapper for internal errors
    Internal(anyhow::Error),
}

impl EngineError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Classify an internal error: transport failures against the embedder
    /// or LLM become `ExternalUnavailable`, everything else stays internal
    pub fn classify(err: anyhow::Error) -> Self {
        if err
            .chain()
            .any(|cause| cause.downcast_ref::<reqwest::Error>().is_some())
        {
            Self::ExternalUnavailable(format!("{err:#}"))
        } else {
            Self::Internal(err)
        }
    }

    /// Machine-readable code for client branching
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::NotInitialized(_) => "NOT_INITIALIZED",
            Self::ExternalUnavailable(_) => "EXTERNAL_UNAVAILABLE",
            Self::PersistenceCorrupt { .. } => "PERSISTENCE_CORRUPT",
            Self::Partial { .. } => "PARTIAL_FAILURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::ExternalUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::NotInitialized(_)
            | Self::PersistenceCorrupt { .. }
            | Self::Partial { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidRequest { field, reason } => {
                format!("Invalid '{field}': {reason}")
            }
            Self::NotInitialized(what) => format!("Not initialized: {what}"),
            Self::ExternalUnavailable(what) => format!("External service unavailable: {what}"),
            Self::PersistenceCorrupt { path, details } => {
                format!("Corrupt snapshot '{path}': {details}")
            }
            Self::Partial { failed_sessions } => {
                format!(
                    "Extraction failed for sessions: {}",
                    failed_sessions.join(", ")
                )
            }
            Self::Internal(err) => format!("{err:#}"),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.message(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result alias used at the HTTP boundary
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_is_400() {
        let err = EngineError::invalid("containerTag", "must match [A-Za-z0-9_-]+");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(err.message().contains("containerTag"));
    }

    #[test]
    fn external_unavailable_is_502() {
        let err = EngineError::ExternalUnavailable("embedder".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn partial_lists_sessions() {
        let err = EngineError::Partial {
            failed_sessions: vec!["s1".to_string(), "s2".to_string()],
        };
        assert!(err.message().contains("s1"));
        assert!(err.message().contains("s2"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
