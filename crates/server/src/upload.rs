//! Upload session manager.
//!
//! Accepts batches of files for a site, writes them to the blob store with
//! bounded parallelism, tracks which chunks of a multi-request upload have
//! arrived and turns a finished upload into a site record.

use crate::auth::check_owner;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    ACTIVE_SESSIONS, BYTES_WRITTEN, CHUNK_BATCH_DURATION, CHUNKS_RECEIVED, FILE_WRITE_FAILURES,
    FILES_WRITTEN, INCOMPLETE_FINALIZES, SESSIONS_EXPIRED, SESSIONS_FINALIZED,
};
use crate::resolver::Resolver;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use quay_core::config::AppConfig;
use quay_core::upload::validate_chunk;
use quay_core::{
    FileWriteResult, FinalizeRequest, FinalizeResult, SiteId, SiteStatus, SiteSummary,
    UploadBatchResult, UploadPath, UploadSession, UploadSessionView, content_type_for, object_key,
    site_prefix,
};
use quay_registry::Registry;
use quay_storage::ObjectStore;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::OnceCell;

/// One uploaded file.
#[derive(Clone, Debug)]
pub struct IncomingFile {
    pub path: UploadPath,
    pub data: Bytes,
}

/// A batch of files from one upload request.
#[derive(Clone, Debug, Default)]
pub struct UploadBatch {
    /// Existing site to add to; a new id is generated when absent.
    pub site_id: Option<SiteId>,
    pub site_name: Option<String>,
    /// `(chunk_number, total_chunks)` for chunked uploads.
    pub chunk: Option<(u32, u32)>,
    pub files: Vec<IncomingFile>,
}

pub struct UploadManager {
    config: Arc<AppConfig>,
    storage: Arc<dyn ObjectStore>,
    registry: Registry,
    resolver: Arc<Resolver>,
    container_ready: OnceCell<()>,
}

impl UploadManager {
    pub fn new(
        config: Arc<AppConfig>,
        storage: Arc<dyn ObjectStore>,
        registry: Registry,
        resolver: Arc<Resolver>,
    ) -> Self {
        Self {
            config,
            storage,
            registry,
            resolver,
            container_ready: OnceCell::new(),
        }
    }

    /// Create the public-read container once per process, before any write.
    ///
    /// A failed attempt is retried by the next upload.
    pub async fn ensure_container(&self) -> ApiResult<()> {
        self.container_ready
            .get_or_try_init(|| async {
                self.storage.ensure_container().await?;
                tracing::info!(
                    backend = self.storage.backend_name(),
                    "Blob store container ready"
                );
                Ok::<_, ApiError>(())
            })
            .await?;
        Ok(())
    }

    /// Write one batch and, for chunked uploads, acknowledge its chunk.
    ///
    /// Without chunk numbers the upload is finalized immediately.
    #[tracing::instrument(
        skip(self, batch),
        fields(site_id = tracing::field::Empty, chunk = ?batch.chunk, files = batch.files.len())
    )]
    pub async fn begin_or_continue(
        &self,
        batch: UploadBatch,
        owner: Option<&str>,
    ) -> ApiResult<UploadBatchResult> {
        if batch.files.is_empty() {
            return Err(ApiError::BadRequest("upload contains no files".to_string()));
        }
        if let Some((chunk_number, total_chunks)) = batch.chunk {
            validate_chunk(chunk_number, total_chunks)?;
        }

        let site_id = batch.site_id.unwrap_or_else(SiteId::generate);
        tracing::Span::current().record("site_id", tracing::field::display(&site_id));

        let existing = self.registry.sites.get_site(&site_id).await?;
        if let Some(site) = &existing {
            check_owner(site.owner_id.as_deref(), owner, "site")?;
        }
        if let Some(session) = self.registry.sessions.get_session(&site_id).await? {
            check_owner(session.owner_id.as_deref(), owner, "upload session")?;
        }

        self.ensure_container().await?;

        let started = Instant::now();
        let total = batch.files.len();
        let results = self.write_files(&site_id, batch.files).await;
        CHUNK_BATCH_DURATION.observe(started.elapsed().as_secs_f64());

        let failed = results.iter().filter(|r| !r.success).count();
        if failed == total {
            return Err(ApiError::UploadFailed { failed, total });
        }
        let written = (total - failed) as u64;

        let name = batch
            .site_name
            .clone()
            .or_else(|| existing.as_ref().map(|s| s.name.clone()))
            .unwrap_or_else(|| site_id.to_string());

        let (received_chunks, complete, site) = match batch.chunk {
            Some((chunk_number, total_chunks)) => {
                let session = if failed == 0 {
                    let ack = self
                        .registry
                        .sessions
                        .record_chunk(&site_id, chunk_number, total_chunks, written, owner)
                        .await?;
                    if ack.newly_received {
                        CHUNKS_RECEIVED.inc();
                    }
                    Some(ack.session)
                } else {
                    tracing::warn!(
                        chunk_number,
                        failed,
                        "Chunk not acknowledged because some files failed to write"
                    );
                    self.registry.sessions.get_session(&site_id).await?
                };

                let received = session
                    .as_ref()
                    .map(|s| s.received_chunks.iter().copied().collect())
                    .unwrap_or_default();
                let complete = session.as_ref().is_some_and(UploadSession::is_complete);
                let site = existing.unwrap_or_else(|| {
                    SiteSummary::draft(
                        site_id.clone(),
                        name,
                        self.config.server.site_url(&site_id),
                        owner.map(str::to_string),
                    )
                });
                (received, complete, site)
            }
            None => {
                let site = self
                    .persist_site(&site_id, name, owner, existing.as_ref(), None, failed == 0)
                    .await?;
                (Vec::new(), failed == 0, site)
            }
        };

        tracing::info!(written, failed, complete, "Upload batch stored");

        Ok(UploadBatchResult {
            success: failed == 0,
            site_id,
            files_received: total as u64,
            files_failed: failed as u64,
            chunk_number: batch.chunk.map(|(n, _)| n),
            total_chunks: batch.chunk.map(|(_, t)| t),
            received_chunks,
            complete,
            results,
            site,
        })
    }

    /// Write files with at most `server.write_concurrency` puts in flight.
    ///
    /// Results come back in input order.
    async fn write_files(&self, site_id: &SiteId, files: Vec<IncomingFile>) -> Vec<FileWriteResult> {
        let concurrency = self.config.server.write_concurrency.max(1);
        stream::iter(files)
            .map(|file| {
                let storage = self.storage.clone();
                let key = object_key(site_id, &file.path);
                async move {
                    let content_type = content_type_for(file.path.as_str());
                    let size = file.data.len() as u64;
                    match storage.put(&key, file.data, &content_type).await {
                        Ok(()) => {
                            FILES_WRITTEN.inc();
                            BYTES_WRITTEN.inc_by(size);
                            FileWriteResult::ok(file.path.as_str())
                        }
                        Err(e) => {
                            FILE_WRITE_FAILURES.inc();
                            tracing::warn!(key = %key, error = %e, "File write failed");
                            FileWriteResult::failed(file.path.as_str(), e.to_string())
                        }
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    /// Persist the site for an upload and discard its session.
    ///
    /// Lenient: a missing or incomplete session is logged, not refused,
    /// unless `require_complete` is set.
    #[tracing::instrument(skip(self, request), fields(site_id = %request.site_id))]
    pub async fn finalize(
        &self,
        request: FinalizeRequest,
        owner: Option<&str>,
    ) -> ApiResult<FinalizeResult> {
        let site_id = request.site_id;
        let existing = self.registry.sites.get_site(&site_id).await?;
        if let Some(site) = &existing {
            check_owner(site.owner_id.as_deref(), owner, "site")?;
        }

        let session = self.registry.sessions.get_session(&site_id).await?;
        if let Some(session) = &session {
            check_owner(session.owner_id.as_deref(), owner, "upload session")?;
        }

        let complete = match &session {
            Some(session) => {
                let missing = session.missing_chunks();
                if !missing.is_empty() {
                    INCOMPLETE_FINALIZES.inc();
                    if request.require_complete {
                        return Err(ApiError::IncompleteUpload { missing });
                    }
                    tracing::warn!(
                        received = session.received_chunks.len(),
                        total_chunks = session.total_chunks,
                        missing = ?missing,
                        "Finalizing upload with missing chunks"
                    );
                }
                if let Some(expected) = request.total_files
                    && expected != session.files_written
                {
                    tracing::warn!(
                        expected,
                        files_written = session.files_written,
                        "Finalize file count differs from files written"
                    );
                }
                missing.is_empty()
            }
            None => {
                // The last finalize recorded whether that upload was whole
                let complete = existing.as_ref().is_some_and(|s| s.upload_complete);
                if !complete {
                    if request.require_complete {
                        return Err(ApiError::UnverifiedUpload(
                            "no upload session and no complete upload on record".to_string(),
                        ));
                    }
                    tracing::warn!(
                        site_exists = existing.is_some(),
                        "Finalize without an upload session and no complete upload on record"
                    );
                }
                complete
            }
        };

        let name = request
            .site_name
            .clone()
            .or_else(|| existing.as_ref().map(|s| s.name.clone()))
            .unwrap_or_else(|| site_id.to_string());
        let session_owner = session.as_ref().and_then(|s| s.owner_id.as_deref());
        let site = self
            .persist_site(
                &site_id,
                name,
                owner.or(session_owner),
                existing.as_ref(),
                session.as_ref(),
                complete,
            )
            .await?;

        if self.registry.sessions.delete_session(&site_id).await?.is_some() {
            tracing::debug!("Upload session discarded");
        }
        SESSIONS_FINALIZED.inc();

        Ok(FinalizeResult {
            success: true,
            complete,
            session_found: session.is_some(),
            received_chunks: session
                .as_ref()
                .map(|s| s.received_chunks.iter().copied().collect())
                .unwrap_or_default(),
            total_chunks: session.as_ref().map(|s| s.total_chunks),
            files_written: session.as_ref().map_or(site.file_count, |s| s.files_written),
            site,
        })
    }

    /// Upsert the site record from what is actually stored under its prefix.
    async fn persist_site(
        &self,
        site_id: &SiteId,
        name: String,
        owner: Option<&str>,
        existing: Option<&SiteSummary>,
        session: Option<&UploadSession>,
        upload_complete: bool,
    ) -> ApiResult<SiteSummary> {
        let file_count = self.storage.list(&site_prefix(site_id)).await?.len() as u64;
        let status = if file_count > 0 {
            SiteStatus::Active
        } else {
            SiteStatus::Failed
        };

        let mut listing = self.resolver.listing(site_id);
        let storage_url = match self.resolver.find_entry(site_id, &mut listing).await? {
            Some(entry) => {
                let path = UploadPath::parse(&entry)?;
                self.storage.public_url(&object_key(site_id, &path))
            }
            None => {
                tracing::warn!(file_count, "Site has no entry document");
                None
            }
        };

        let now = OffsetDateTime::now_utc();
        let site = SiteSummary {
            id: site_id.clone(),
            name,
            url: self.config.server.site_url(site_id),
            status,
            owner_id: owner
                .map(str::to_string)
                .or_else(|| existing.and_then(|s| s.owner_id.clone())),
            storage_url,
            file_count,
            upload_complete,
            created_at: existing
                .map(|s| s.created_at)
                .or_else(|| session.map(|s| s.created_at))
                .unwrap_or(now),
            updated_at: now,
        };
        let stored = self.registry.sites.upsert_site(&site).await?;
        tracing::info!(status = %stored.status, file_count, "Site record saved");
        Ok(stored)
    }

    pub async fn session(&self, site_id: &SiteId) -> ApiResult<Option<UploadSessionView>> {
        Ok(self
            .registry
            .sessions
            .get_session(site_id)
            .await?
            .map(|s| s.view()))
    }

    /// Remove a site's objects and record together.
    ///
    /// Objects go first so a failure never leaves a record without a way
    /// to retry the delete.
    #[tracing::instrument(skip(self))]
    pub async fn delete_site(&self, site_id: &SiteId, owner: Option<&str>) -> ApiResult<u64> {
        let site = self
            .registry
            .sites
            .get_site(site_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("site {site_id}")))?;
        check_owner(site.owner_id.as_deref(), owner, "site")?;

        let removed = self.storage.delete_prefix(&site_prefix(site_id)).await?;
        self.registry.sessions.delete_session(site_id).await?;
        self.registry.sites.delete_site(site_id).await?;
        tracing::info!(objects = removed, "Site deleted");
        Ok(removed)
    }

    /// Discard sessions idle for longer than `upload.session_ttl_secs`.
    ///
    /// Blobs already written stay in place.
    pub async fn sweep_expired(&self) -> ApiResult<usize> {
        let cutoff = OffsetDateTime::now_utc() - self.config.upload.session_ttl();
        let removed = self.registry.sessions.delete_idle_sessions(cutoff).await?;
        for site_id in &removed {
            tracing::info!(site_id = %site_id, "Discarded abandoned upload session");
        }
        SESSIONS_EXPIRED.inc_by(removed.len() as u64);
        let remaining = self.registry.sessions.count_sessions().await?;
        ACTIVE_SESSIONS.set(i64::try_from(remaining).unwrap_or(i64::MAX));
        Ok(removed.len())
    }
}
