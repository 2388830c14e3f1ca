//! Request validation
//!
//! Explicit checks on everything that crosses the HTTP boundary, mapped to
//! `InvalidRequest` by the handlers.

use anyhow::{anyhow, Result};

pub const MAX_TAG_LENGTH: usize = 128;
pub const MAX_QUERY_LENGTH: usize = 8_192;
pub const MAX_RESULTS: usize = 1_000;

/// Validate a container tag: `[A-Za-z0-9_-]+`, bounded length
pub fn validate_container_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(anyhow!("containerTag cannot be empty"));
    }

    if tag.len() > MAX_TAG_LENGTH {
        return Err(anyhow!(
            "containerTag too long: {} chars (max: {})",
            tag.len(),
            MAX_TAG_LENGTH
        ));
    }

    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!(
            "containerTag contains invalid characters (allowed: alphanumeric, -, _)"
        ));
    }

    Ok(())
}

/// Validate a search query string
pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(anyhow!("query cannot be empty"));
    }

    if query.len() > MAX_QUERY_LENGTH {
        return Err(anyhow!(
            "query too long: {} chars (max: {})",
            query.len(),
            MAX_QUERY_LENGTH
        ));
    }

    Ok(())
}

/// Validate a result limit
pub fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(anyhow!("limit must be greater than 0"));
    }

    if limit > MAX_RESULTS {
        return Err(anyhow!("limit too large: {limit} (max: {MAX_RESULTS})"));
    }

    Ok(())
}

/// Validate an optional session date (`YYYY-MM-DD`)
pub fn validate_date(date: &str) -> Result<()> {
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| anyhow!("date must be YYYY-MM-DD, got '{date}'"))
}

/// Validate a session id (non-empty, no control characters)
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(anyhow!("sessionId cannot be empty"));
    }

    if session_id.chars().any(|c| c.is_control()) {
        return Err(anyhow!("sessionId contains control characters"));
    }

    Ok(())
}
