//! Upload session repository.

use crate::error::RegistryResult;
use async_trait::async_trait;
use quay_core::{SiteId, UploadSession};
use time::OffsetDateTime;

/// Outcome of acknowledging one chunk.
#[derive(Clone, Debug)]
pub struct ChunkAck {
    /// Session state after the acknowledgement.
    pub session: UploadSession,
    /// False when the chunk had already been acknowledged.
    pub newly_received: bool,
}

/// Injectable store for upload sessions.
///
/// Implementations must make `record_chunk` atomic per site; different sites
/// must never contend on a shared lock.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn get_session(&self, site_id: &SiteId) -> RegistryResult<Option<UploadSession>>;

    /// Store a session, replacing any previous one for the site.
    async fn put_session(&self, session: &UploadSession) -> RegistryResult<()>;

    /// Remove a session, returning it if it existed.
    async fn delete_session(&self, site_id: &SiteId) -> RegistryResult<Option<UploadSession>>;

    /// Create the session if needed and add `chunk_number` to its received set.
    ///
    /// `files` is only added to the counter when the chunk is new.
    async fn record_chunk(
        &self,
        site_id: &SiteId,
        chunk_number: u32,
        total_chunks: u32,
        files: u64,
        owner_id: Option<&str>,
    ) -> RegistryResult<ChunkAck>;

    /// Delete sessions last updated before `cutoff`. Returns the removed site ids.
    async fn delete_idle_sessions(&self, cutoff: OffsetDateTime) -> RegistryResult<Vec<SiteId>>;

    /// Number of live sessions.
    async fn count_sessions(&self) -> RegistryResult<u64>;
}
