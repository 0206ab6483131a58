//! Upload session state and per-operation result types.

use crate::site::{SiteId, SiteSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::{Duration, OffsetDateTime};

/// Validate chunk numbering: `chunk_number` must be in `[1, total_chunks]`.
pub fn validate_chunk(chunk_number: u32, total_chunks: u32) -> crate::Result<()> {
    if total_chunks == 0 || chunk_number == 0 || chunk_number > total_chunks {
        return Err(crate::Error::InvalidChunk {
            chunk_number,
            total_chunks,
        });
    }
    Ok(())
}

/// One logical multi-chunk upload, keyed by site.
///
/// The received set only grows. A session is dropped once finalize runs or
/// once the sweeper finds it idle for longer than the session TTL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub site_id: SiteId,
    pub total_chunks: u32,
    pub received_chunks: BTreeSet<u32>,
    pub files_written: u64,
    pub owner_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UploadSession {
    pub fn new(site_id: SiteId, total_chunks: u32, owner_id: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            site_id,
            total_chunks,
            received_chunks: BTreeSet::new(),
            files_written: 0,
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Acknowledge a chunk. Returns `true` when the chunk was not seen before.
    ///
    /// Files are only counted for newly acknowledged chunks so a retried chunk
    /// never inflates `files_written`. A larger `total_chunks` from a later
    /// request widens the session.
    pub fn record_chunk(
        &mut self,
        chunk_number: u32,
        total_chunks: u32,
        files: u64,
    ) -> crate::Result<bool> {
        validate_chunk(chunk_number, total_chunks)?;
        self.total_chunks = self.total_chunks.max(total_chunks);
        self.updated_at = OffsetDateTime::now_utc();
        let added = self.received_chunks.insert(chunk_number);
        if added {
            self.files_written += files;
        }
        Ok(added)
    }

    /// All expected chunks have been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.missing_chunks().is_empty()
    }

    /// Chunk numbers not yet acknowledged.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (1..=self.total_chunks)
            .filter(|n| !self.received_chunks.contains(n))
            .collect()
    }

    /// Idle for longer than `ttl` as of `now`.
    pub fn is_expired(&self, ttl: Duration, now: OffsetDateTime) -> bool {
        now - self.updated_at > ttl
    }

    pub fn view(&self) -> UploadSessionView {
        UploadSessionView {
            site_id: self.site_id.clone(),
            total_chunks: self.total_chunks,
            received_chunks: self.received_chunks.iter().copied().collect(),
            files_written: self.files_written,
            complete: self.is_complete(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Session state as exposed to resumable clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionView {
    pub site_id: SiteId,
    pub total_chunks: u32,
    pub received_chunks: Vec<u32>,
    pub files_written: u64,
    pub complete: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Outcome of writing one file to the Blob Store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteResult {
    pub path: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileWriteResult {
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Response to one upload batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatchResult {
    pub success: bool,
    pub site_id: SiteId,
    pub files_received: u64,
    pub files_failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    /// Chunks acknowledged so far (chunked mode only).
    #[serde(default)]
    pub received_chunks: Vec<u32>,
    /// Whether every expected chunk has been acknowledged.
    pub complete: bool,
    pub results: Vec<FileWriteResult>,
    pub site: SiteSummary,
}

/// Body of `POST /sites/finalize-upload`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub site_id: SiteId,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub total_files: Option<u64>,
    /// Refuse to finalize while chunks are missing.
    #[serde(default)]
    pub require_complete: bool,
}

/// Response to finalize.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResult {
    pub success: bool,
    pub site: SiteSummary,
    pub complete: bool,
    /// Whether a chunk session existed when finalize ran.
    pub session_found: bool,
    #[serde(default)]
    pub received_chunks: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    pub files_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total: u32) -> UploadSession {
        UploadSession::new(SiteId::parse("s1").unwrap(), total, None)
    }

    #[test]
    fn test_chunk_bounds() {
        assert!(validate_chunk(1, 1).is_ok());
        assert!(validate_chunk(3, 3).is_ok());
        assert!(validate_chunk(0, 3).is_err());
        assert!(validate_chunk(4, 3).is_err());
        assert!(validate_chunk(1, 0).is_err());
    }

    #[test]
    fn test_out_of_order_chunks_complete() {
        let mut s = session(3);
        assert!(s.record_chunk(3, 3, 2).unwrap());
        assert!(s.record_chunk(1, 3, 4).unwrap());
        assert!(!s.is_complete());
        assert_eq!(s.missing_chunks(), vec![2]);
        assert!(s.record_chunk(2, 3, 1).unwrap());
        assert!(s.is_complete());
        assert_eq!(s.files_written, 7);
    }

    #[test]
    fn test_repeated_chunk_not_double_counted() {
        let mut s = session(2);
        assert!(s.record_chunk(1, 2, 5).unwrap());
        assert!(!s.record_chunk(1, 2, 5).unwrap());
        assert_eq!(s.files_written, 5);
        assert_eq!(s.received_chunks.len(), 1);
    }

    #[test]
    fn test_invalid_chunk_leaves_session_untouched() {
        let mut s = session(2);
        assert!(s.record_chunk(5, 2, 1).is_err());
        assert!(s.received_chunks.is_empty());
        assert_eq!(s.files_written, 0);
    }

    #[test]
    fn test_expiry() {
        let s = session(1);
        let now = s.updated_at;
        assert!(!s.is_expired(Duration::hours(1), now + Duration::minutes(30)));
        assert!(s.is_expired(Duration::hours(1), now + Duration::hours(2)));
    }

    #[test]
    fn test_file_result_serialization_omits_missing_error() {
        let json = serde_json::to_value(FileWriteResult::ok("index.html")).unwrap();
        assert_eq!(json, serde_json::json!({"path": "index.html", "success": true}));
        let json = serde_json::to_value(FileWriteResult::failed("a.js", "boom")).unwrap();
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn test_finalize_request_defaults() {
        let req: FinalizeRequest =
            serde_json::from_str(r#"{"siteId":"abc","siteName":"Demo","totalFiles":3}"#).unwrap();
        assert_eq!(req.site_id.as_str(), "abc");
        assert_eq!(req.total_files, Some(3));
        assert!(!req.require_complete);
    }
}
