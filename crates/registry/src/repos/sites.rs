//! Site record repository.

use crate::error::RegistryResult;
use async_trait::async_trait;
use quay_core::{SiteId, SiteSummary};

/// Repository for site records.
#[async_trait]
pub trait SiteRepo: Send + Sync {
    /// Insert or update a site.
    ///
    /// An existing record keeps its `created_at` and, when the update carries
    /// no owner, its `owner_id`. Returns the stored record.
    async fn upsert_site(&self, site: &SiteSummary) -> RegistryResult<SiteSummary>;

    /// Get a site by id.
    async fn get_site(&self, site_id: &SiteId) -> RegistryResult<Option<SiteSummary>>;

    /// List sites, newest first. `owner_id = None` lists every site.
    async fn list_sites(&self, owner_id: Option<&str>) -> RegistryResult<Vec<SiteSummary>>;

    /// Delete a site record. Returns whether a record existed.
    async fn delete_site(&self, site_id: &SiteId) -> RegistryResult<bool>;
}
