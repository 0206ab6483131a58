//! In-process upload session store.

use crate::error::RegistryResult;
use crate::repos::{ChunkAck, SessionRepo};
use async_trait::async_trait;
use dashmap::DashMap;
use quay_core::upload::validate_chunk;
use quay_core::{SiteId, UploadSession};
use time::OffsetDateTime;

/// Session store backed by a sharded concurrent map.
///
/// Chunk acknowledgements for one site serialize on that site's shard entry;
/// other sites proceed independently.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SiteId, UploadSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepo for MemorySessionStore {
    async fn get_session(&self, site_id: &SiteId) -> RegistryResult<Option<UploadSession>> {
        Ok(self.sessions.get(site_id).map(|s| s.value().clone()))
    }

    async fn put_session(&self, session: &UploadSession) -> RegistryResult<()> {
        self.sessions
            .insert(session.site_id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, site_id: &SiteId) -> RegistryResult<Option<UploadSession>> {
        Ok(self.sessions.remove(site_id).map(|(_, s)| s))
    }

    async fn record_chunk(
        &self,
        site_id: &SiteId,
        chunk_number: u32,
        total_chunks: u32,
        files: u64,
        owner_id: Option<&str>,
    ) -> RegistryResult<ChunkAck> {
        // Validate before touching the map so bad input never creates a session
        validate_chunk(chunk_number, total_chunks)?;

        let mut entry = self.sessions.entry(site_id.clone()).or_insert_with(|| {
            UploadSession::new(site_id.clone(), total_chunks, owner_id.map(str::to_string))
        });
        if entry.owner_id.is_none() {
            entry.owner_id = owner_id.map(str::to_string);
        }
        let newly_received = entry.record_chunk(chunk_number, total_chunks, files)?;

        Ok(ChunkAck {
            session: entry.value().clone(),
            newly_received,
        })
    }

    async fn delete_idle_sessions(&self, cutoff: OffsetDateTime) -> RegistryResult<Vec<SiteId>> {
        let mut removed = Vec::new();
        self.sessions.retain(|site_id, session| {
            let idle = session.updated_at < cutoff;
            if idle {
                removed.push(site_id.clone());
            }
            !idle
        });
        Ok(removed)
    }

    async fn count_sessions(&self) -> RegistryResult<u64> {
        Ok(self.sessions.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_record_chunk_creates_and_accumulates() {
        let store = MemorySessionStore::new();
        let id = SiteId::parse("m1").unwrap();

        let ack = store.record_chunk(&id, 1, 2, 3, Some("alice")).await.unwrap();
        assert!(ack.newly_received);
        assert!(!ack.session.is_complete());

        let ack = store.record_chunk(&id, 1, 2, 3, None).await.unwrap();
        assert!(!ack.newly_received);
        assert_eq!(ack.session.files_written, 3);

        let ack = store.record_chunk(&id, 2, 2, 2, None).await.unwrap();
        assert!(ack.session.is_complete());
        assert_eq!(ack.session.files_written, 5);
        assert_eq!(ack.session.owner_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_invalid_chunk_creates_nothing() {
        let store = MemorySessionStore::new();
        let id = SiteId::parse("m2").unwrap();
        assert!(store.record_chunk(&id, 0, 2, 1, None).await.is_err());
        assert_eq!(store.count_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_parallel_chunks_from_many_tasks() {
        let store = Arc::new(MemorySessionStore::new());
        let id = SiteId::parse("m3").unwrap();

        let handles: Vec<_> = (1..=50u32)
            .map(|n| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.record_chunk(&id, n, 50, 1, None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let session = store.get_session(&id).await.unwrap().unwrap();
        assert!(session.is_complete());
        assert_eq!(session.files_written, 50);
    }

    #[tokio::test]
    async fn test_delete_idle_sessions() {
        let store = MemorySessionStore::new();
        let old = SiteId::parse("old").unwrap();
        let mut session = UploadSession::new(old.clone(), 1, None);
        session.updated_at -= time::Duration::days(2);
        store.put_session(&session).await.unwrap();
        store
            .record_chunk(&SiteId::parse("new").unwrap(), 1, 1, 1, None)
            .await
            .unwrap();

        let removed = store
            .delete_idle_sessions(OffsetDateTime::now_utc() - time::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, vec![old.clone()]);
        assert!(store.delete_session(&old).await.unwrap().is_none());
        assert_eq!(store.count_sessions().await.unwrap(), 1);
    }
}
