//! HTTP server for quay static sites.
//!
//! This crate provides:
//! - Chunked and direct folder uploads with lenient finalize
//! - Site records and upload session progress
//! - The resolving proxy that serves uploaded bundles, rewriting entry
//!   documents so relative asset references land under the proxy path

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod resolver;
pub mod rewrite;
pub mod routes;
pub mod state;
pub mod sweep;
pub mod upload;

pub use auth::{Caller, TraceId};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
