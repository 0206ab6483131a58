//! Upload and finalize handlers.

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::upload::{IncomingFile, UploadBatch};
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use bytes::{Bytes, BytesMut};
use quay_core::{
    FinalizeRequest, FinalizeResult, SiteId, UploadBatchResult, UploadPath, UploadSessionView,
};

/// Text fields recognized in an upload form; anything carrying a file name
/// is a file.
const FIELD_SITE_ID: &str = "siteId";
const FIELD_SITE_NAME: &str = "siteName";
const FIELD_CHUNK_NUMBER: &str = "chunkNumber";
const FIELD_TOTAL_CHUNKS: &str = "totalChunks";
/// Optional relative path for the file at the same position; browsers drop
/// directories from multipart file names.
const FIELD_PATHS: &str = "paths";

/// POST /sites/upload-folder - Store one batch of a site bundle.
#[tracing::instrument(skip(state, caller, multipart))]
pub async fn upload_folder(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    multipart: Multipart,
) -> ApiResult<Json<UploadBatchResult>> {
    let owner = caller.owner_for_write(&state.config.auth)?;
    let batch = read_batch(multipart, state.config.server.max_file_size).await?;
    let result = state.uploads.begin_or_continue(batch, owner).await?;
    Ok(Json(result))
}

/// POST /sites/finalize-upload - Turn an upload into a site record.
#[tracing::instrument(skip(state, caller, request), fields(site_id = %request.site_id))]
pub async fn finalize_upload(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<FinalizeRequest>,
) -> ApiResult<Json<FinalizeResult>> {
    let owner = caller.owner_for_write(&state.config.auth)?;
    let result = state.uploads.finalize(request, owner).await?;
    Ok(Json(result))
}

/// GET /sites/{site_id}/upload-session - Progress of an unfinished upload.
pub async fn get_upload_session(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> ApiResult<Json<UploadSessionView>> {
    let site_id = SiteId::parse(&site_id)?;
    state
        .uploads
        .session(&site_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no upload session for {site_id}")))
}

/// Collect form fields into a batch.
async fn read_batch(mut multipart: Multipart, max_file_size: u64) -> ApiResult<UploadBatch> {
    let mut batch = UploadBatch::default();
    let mut names: Vec<String> = Vec::new();
    let mut paths: Vec<String> = Vec::new();
    let mut contents: Vec<Bytes> = Vec::new();
    let mut chunk_number = None;
    let mut total_chunks = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let data = read_file(field, &file_name, max_file_size).await?;
            names.push(file_name);
            contents.push(data);
            continue;
        }

        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.map_err(multipart_error)?;
        let value = value.trim();
        match name.as_str() {
            FIELD_SITE_ID if !value.is_empty() => batch.site_id = Some(SiteId::parse(value)?),
            FIELD_SITE_NAME if !value.is_empty() => batch.site_name = Some(value.to_string()),
            FIELD_CHUNK_NUMBER if !value.is_empty() => {
                chunk_number = Some(parse_number(&name, value)?);
            }
            FIELD_TOTAL_CHUNKS if !value.is_empty() => {
                total_chunks = Some(parse_number(&name, value)?);
            }
            FIELD_PATHS => paths.push(value.to_string()),
            _ => tracing::debug!(field = %name, "Ignoring form field"),
        }
    }

    batch.chunk = match (chunk_number, total_chunks) {
        (Some(n), Some(t)) => Some((n, t)),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "chunkNumber and totalChunks must be sent together".to_string(),
            ));
        }
    };

    for (i, (file_name, data)) in names.into_iter().zip(contents).enumerate() {
        let raw = paths
            .get(i)
            .filter(|p| !p.is_empty())
            .map_or(file_name.as_str(), String::as_str);
        batch.files.push(IncomingFile {
            path: UploadPath::parse(raw)?,
            data,
        });
    }
    Ok(batch)
}

/// Read one file field, refusing anything over `max_file_size`.
async fn read_file(mut field: Field<'_>, file_name: &str, max_file_size: u64) -> ApiResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if (buf.len() + chunk.len()) as u64 > max_file_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "{file_name} exceeds the {max_file_size} byte file limit"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn parse_number(field: &str, value: &str) -> ApiResult<u32> {
    value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{field} must be a positive integer")))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}
