//! Application state shared across handlers.

use crate::auth::TokenTable;
use crate::resolver::Resolver;
use crate::upload::UploadManager;
use quay_core::config::AppConfig;
use quay_registry::Registry;
use quay_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob store holding every site's files.
    pub storage: Arc<dyn ObjectStore>,
    /// Site records and upload sessions.
    pub registry: Registry,
    /// Upload session manager.
    pub uploads: Arc<UploadManager>,
    /// Asset resolver for proxied requests.
    pub resolver: Arc<Resolver>,
    /// Bearer token digests and their owners.
    pub tokens: Arc<TokenTable>,
}

impl AppState {
    /// Wire the upload manager and resolver over the given backends.
    ///
    /// Configuration is expected to have passed [`AppConfig::validate`].
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>, registry: Registry) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(Resolver::new(storage.clone(), &config.proxy));
        let uploads = Arc::new(UploadManager::new(
            config.clone(),
            storage.clone(),
            registry.clone(),
            resolver.clone(),
        ));
        let tokens = Arc::new(TokenTable::from_config(&config.auth));

        Self {
            config,
            storage,
            registry,
            uploads,
            resolver,
            tokens,
        }
    }
}
