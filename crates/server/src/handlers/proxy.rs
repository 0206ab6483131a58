//! Site serving: resolve, rewrite the entry document, set headers, stream.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{HTML_REWRITES, PROXY_REQUEST_DURATION};
use crate::resolver::ResolveResult;
use crate::rewrite::{RewriteContext, has_content_hash, rewrite_entry};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use quay_core::content_type::is_html;
use quay_core::path::basename;
use quay_core::{SiteId, content_type_for, is_text, proxy_base};
use std::time::Instant;

/// Header naming the resolver strategy that produced a response.
pub const RESOLVE_STRATEGY_HEADER: HeaderName = HeaderName::from_static("x-resolve-strategy");

const CACHE_ENTRY: &str = "no-cache";
const CACHE_HASHED: &str = "public, max-age=31536000, immutable";
const CACHE_DEFAULT: &str = "public, max-age=300";

/// GET /sites/{site_id}/raw - The entry document, rewritten.
pub async fn serve_raw(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> ApiResult<Response> {
    serve(&state, &site_id, "").await
}

/// GET /sites/{site_id}/proxy/ - Site root.
pub async fn serve_root(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> ApiResult<Response> {
    serve(&state, &site_id, "").await
}

/// GET /sites/{site_id}/proxy/{*path} - Any asset or client-side route.
pub async fn serve_path(
    State(state): State<AppState>,
    Path((site_id, path)): Path<(String, String)>,
) -> ApiResult<Response> {
    serve(&state, &site_id, &path).await
}

async fn serve(state: &AppState, site_id: &str, path: &str) -> ApiResult<Response> {
    let started = Instant::now();
    let result = serve_inner(state, site_id, path).await;
    let status = match &result {
        Ok(response) => response.status(),
        Err(e) => e.status_code(),
    };
    PROXY_REQUEST_DURATION
        .with_label_values(&[status.as_str()])
        .observe(started.elapsed().as_secs_f64());
    result
}

#[tracing::instrument(skip(state))]
async fn serve_inner(state: &AppState, site_id: &str, path: &str) -> ApiResult<Response> {
    let site_id = SiteId::parse(site_id)
        .map_err(|_| ApiError::NotFound(format!("site {site_id}")))?;

    let mut listing = state.resolver.listing(&site_id);
    let resolved = state
        .resolver
        .resolve_with(&site_id, path, &mut listing)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{site_id}/{path}")))?;

    let content_type = content_type_for(&resolved.relative_path);
    let cache_control = cache_control_for(&resolved);

    if is_html(&content_type) && resolved.is_entry && state.config.proxy.rewrite_html {
        let raw = state.storage.get(&resolved.key).await?;
        let html = String::from_utf8_lossy(&raw);

        let directory = resolved.directory();
        let files: Vec<String> = listing
            .files()
            .await?
            .iter()
            .filter_map(|f| f.strip_prefix(directory).map(str::to_string))
            .collect();
        let ctx = RewriteContext {
            base_href: format!("{}{directory}", proxy_base(&site_id)),
            files: &files,
        };
        let rewritten = rewrite_entry(&html, &ctx);
        HTML_REWRITES
            .with_label_values(&[rewritten.bundler.as_str()])
            .inc();
        return Ok(respond(
            &resolved,
            &content_type,
            cache_control,
            Body::from(rewritten.html),
            None,
        ));
    }

    if is_text(&content_type) {
        let bytes = state.storage.get(&resolved.key).await?;
        let len = bytes.len() as u64;
        return Ok(respond(
            &resolved,
            &content_type,
            cache_control,
            Body::from(bytes),
            Some(len),
        ));
    }

    let stream = state.storage.get_stream(&resolved.key).await?;
    Ok(respond(
        &resolved,
        &content_type,
        cache_control,
        Body::from_stream(stream),
        None,
    ))
}

fn cache_control_for(resolved: &ResolveResult) -> &'static str {
    if resolved.is_entry {
        CACHE_ENTRY
    } else if has_content_hash(basename(&resolved.relative_path)) {
        CACHE_HASHED
    } else {
        CACHE_DEFAULT
    }
}

fn respond(
    resolved: &ResolveResult,
    content_type: &str,
    cache_control: &'static str,
    body: Body,
    content_length: Option<u64>,
) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
    headers.insert(
        RESOLVE_STRATEGY_HEADER,
        HeaderValue::from_static(resolved.strategy.as_str()),
    );
    if let Some(len) = content_length {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }
    response
}
