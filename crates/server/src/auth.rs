//! Request tracing and bearer-token ownership.
//!
//! Tokens are never stored; configuration carries their SHA-256 hex digests
//! and each digest maps to an owner id. Serving routes ignore tokens
//! entirely, mutating routes consult [`Caller`] through
//! [`Caller::owner_for_write`].

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use quay_core::config::AuthConfig;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    ///
    /// Truncated to [`MAX_TRACE_ID_LEN`] characters with non-printable
    /// characters removed; an empty result falls back to a fresh id.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner ids keyed by token digest.
#[derive(Clone, Debug, Default)]
pub struct TokenTable {
    owners: HashMap<String, String>,
}

impl TokenTable {
    pub fn from_config(config: &AuthConfig) -> Self {
        let owners = config
            .tokens
            .iter()
            .map(|t| (t.token_hash.to_ascii_lowercase(), t.owner.clone()))
            .collect();
        Self { owners }
    }

    /// Look up the owner for a presented bearer token.
    pub fn verify(&self, token: &str) -> Option<&str> {
        self.owners.get(&hash_token(token)).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Who is calling, as established by [`auth_middleware`].
#[derive(Clone, Debug, Default)]
pub struct Caller {
    /// Owner id resolved from a valid bearer token.
    pub owner: Option<String>,
    /// A bearer token was presented but matched no configured token.
    pub rejected_token: bool,
}

impl Caller {
    /// Owner to attribute a mutation to.
    ///
    /// Unknown tokens are always refused; a missing token is refused only
    /// when `require_token` is set.
    pub fn owner_for_write(&self, config: &AuthConfig) -> ApiResult<Option<&str>> {
        if self.rejected_token {
            return Err(ApiError::Unauthorized("unknown token".to_string()));
        }
        if self.owner.is_none() && config.require_token {
            return Err(ApiError::Unauthorized("authentication required".to_string()));
        }
        Ok(self.owner.as_deref())
    }
}

/// Refuse to touch a resource recorded under a different owner.
pub fn check_owner(
    resource_owner: Option<&str>,
    caller: Option<&str>,
    what: &str,
) -> ApiResult<()> {
    match resource_owner {
        Some(owner) if Some(owner) != caller => Err(ApiError::Forbidden(format!(
            "{what} belongs to another owner"
        ))),
        _ => Ok(()),
    }
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// SHA-256 hex digest of a token, as written in `auth.tokens[].token_hash`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Attach a trace id and the resolved [`Caller`] to every request.
///
/// Never rejects on its own: handlers for mutating routes decide whether a
/// missing or unknown token matters.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let caller = match extract_bearer_token(&req) {
        Some(token) => match state.tokens.verify(token) {
            Some(owner) => Caller {
                owner: Some(owner.to_string()),
                rejected_token: false,
            },
            None => {
                tracing::debug!(trace_id = %trace_id_str, "Bearer token matched no configured owner");
                Caller {
                    owner: None,
                    rejected_token: true,
                }
            }
        },
        None => Caller::default(),
    };
    req.extensions_mut().insert(caller);

    next.run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await
}
