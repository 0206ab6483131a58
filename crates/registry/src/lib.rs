//! Site registry and upload session store for quay.
//!
//! This crate provides the control-plane data model:
//! - Site records (name, status, owner, cached entry URL)
//! - Upload sessions and their received-chunk sets
//! - SQLite persistence and an in-process session store

pub mod error;
pub mod memory;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{RegistryError, RegistryResult};
pub use memory::MemorySessionStore;
pub use repos::{ChunkAck, SessionRepo, SiteRepo};
pub use store::{RegistryStore, SqliteStore};

use quay_core::config::{RegistryConfig, SessionStoreKind};
use std::sync::Arc;

/// Site registry plus the session store selected by configuration.
#[derive(Clone)]
pub struct Registry {
    pub sites: Arc<dyn RegistryStore>,
    pub sessions: Arc<dyn SessionRepo>,
}

/// Open the registry described by configuration.
pub async fn from_config(
    config: &RegistryConfig,
    session_store: SessionStoreKind,
) -> RegistryResult<Registry> {
    match config {
        RegistryConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = Arc::new(SqliteStore::new(path, *query_timeout_secs).await?);
            let sessions: Arc<dyn SessionRepo> = match session_store {
                SessionStoreKind::Memory => Arc::new(MemorySessionStore::new()),
                SessionStoreKind::Registry => store.clone(),
            };
            tracing::info!(
                path = %path.display(),
                session_store = ?session_store,
                "Opened SQLite registry"
            );
            Ok(Registry {
                sites: store,
                sessions,
            })
        }
    }
}
