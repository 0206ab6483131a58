//! Site record handlers.

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use quay_core::{SiteId, SiteSummary};
use serde::Serialize;

/// GET /sites/{site_id} - Get a site record.
pub async fn get_site(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> ApiResult<Json<SiteSummary>> {
    let site_id = SiteId::parse(&site_id)?;
    state
        .registry
        .sites
        .get_site(&site_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("site {site_id}")))
}

#[derive(Debug, Serialize)]
pub struct SiteList {
    pub sites: Vec<SiteSummary>,
}

/// GET /sites - List the caller's sites, or every site for anonymous
/// callers when tokens are not required.
pub async fn list_sites(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<SiteList>> {
    let owner = caller.owner_for_write(&state.config.auth)?;
    let sites = state.registry.sites.list_sites(owner).await?;
    Ok(Json(SiteList { sites }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSiteResponse {
    pub success: bool,
    pub site_id: SiteId,
    pub objects_deleted: u64,
}

/// DELETE /sites/{site_id} - Remove a site's files and record.
#[tracing::instrument(skip(state, caller))]
pub async fn delete_site(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(site_id): Path<String>,
) -> ApiResult<Json<DeleteSiteResponse>> {
    let owner = caller.owner_for_write(&state.config.auth)?;
    let site_id = SiteId::parse(&site_id)?;
    let objects_deleted = state.uploads.delete_site(&site_id, owner).await?;
    Ok(Json(DeleteSiteResponse {
        success: true,
        site_id,
        objects_deleted,
    }))
}
