//! Database models mapping to the registry schema.

use crate::error::{RegistryError, RegistryResult};
use quay_core::{SiteId, SiteStatus, SiteSummary, UploadSession};
use sqlx::FromRow;
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// Site record.
#[derive(Debug, Clone, FromRow)]
pub struct SiteRow {
    pub site_id: String,
    pub name: String,
    pub status: String,
    pub owner_id: Option<String>,
    /// Cached entry URL, recomputed on every finalize.
    pub entry_url: String,
    pub storage_url: Option<String>,
    pub file_count: i64,
    pub upload_complete: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SiteRow {
    pub fn from_summary(site: &SiteSummary) -> Self {
        Self {
            site_id: site.id.to_string(),
            name: site.name.clone(),
            status: site.status.as_str().to_string(),
            owner_id: site.owner_id.clone(),
            entry_url: site.url.clone(),
            storage_url: site.storage_url.clone(),
            file_count: i64::try_from(site.file_count).unwrap_or(i64::MAX),
            upload_complete: site.upload_complete,
            created_at: site.created_at,
            updated_at: site.updated_at,
        }
    }

    pub fn into_summary(self) -> RegistryResult<SiteSummary> {
        Ok(SiteSummary {
            id: SiteId::parse(&self.site_id)?,
            name: self.name,
            url: self.entry_url,
            status: SiteStatus::parse(&self.status)?,
            owner_id: self.owner_id,
            storage_url: self.storage_url,
            file_count: u64::try_from(self.file_count).unwrap_or(0),
            upload_complete: self.upload_complete,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Upload session header; received chunks live in `upload_session_chunks`.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub site_id: String,
    pub total_chunks: i64,
    pub files_written: i64,
    pub owner_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UploadSessionRow {
    pub fn into_session(self, chunks: Vec<i64>) -> RegistryResult<UploadSession> {
        let total_chunks = u32::try_from(self.total_chunks)
            .map_err(|_| RegistryError::Internal(format!("bad total_chunks {}", self.total_chunks)))?;
        let received_chunks = chunks
            .into_iter()
            .filter_map(|c| u32::try_from(c).ok())
            .collect::<BTreeSet<_>>();
        Ok(UploadSession {
            site_id: SiteId::parse(&self.site_id)?,
            total_chunks,
            received_chunks,
            files_written: u64::try_from(self.files_written).unwrap_or(0),
            owner_id: self.owner_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
