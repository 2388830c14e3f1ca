//! HTTP surface
//!
//! Thin axum handlers over the engine: validate, delegate, serialize.

pub mod health;
pub mod memory;
pub mod router;
pub mod types;

pub use router::{build_router, AppState};
