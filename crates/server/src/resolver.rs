//! Asset resolution against a site's stored keys.
//!
//! Bundlers disagree about where assets live relative to the markup that
//! references them, so a requested path is checked against the blob store
//! with an ordered list of strategies, first hit wins. Extensionless paths
//! that match nothing are client-side routes and resolve to the entry
//! document; paths with an extension that match nothing are not found.

use crate::metrics::record_resolution;
use quay_core::config::ProxyConfig;
use quay_core::path::{basename, extension};
use quay_core::{SiteId, UploadPath, object_key, site_prefix};
use quay_storage::{ObjectStore, StorageResult};
use serde::Serialize;
use std::sync::Arc;

/// One way of mapping a requested path to a stored key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// `{site}/{path}` exists as requested.
    Exact,
    /// The final segment exists at the bundle root.
    Basename,
    /// The path minus the conventional assets prefix exists.
    StripAssetsPrefix,
    /// Some stored file shares the requested extension.
    SameExtension,
    /// The entry document, for an empty path or a client-side route.
    EntryFallback,
}

/// Lookup order for paths that name a file.
const LOOKUP_ORDER: [Strategy; 4] = [
    Strategy::Exact,
    Strategy::Basename,
    Strategy::StripAssetsPrefix,
    Strategy::SameExtension,
];

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Basename => "basename",
            Self::StripAssetsPrefix => "strip-assets-prefix",
            Self::SameExtension => "same-extension",
            Self::EntryFallback => "entry",
        }
    }

    pub fn confidence(&self) -> Confidence {
        match self {
            Self::SameExtension => Confidence::Low,
            _ => Confidence::High,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Where a request landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolveResult {
    /// Full object key in the blob store.
    pub key: String,
    /// Key relative to the site root.
    pub relative_path: String,
    pub strategy: Strategy,
    pub confidence: Confidence,
    /// The resolved file is the site's entry document.
    pub is_entry: bool,
}

impl ResolveResult {
    /// Directory of the resolved file relative to the site root, with a
    /// trailing slash, or empty at the root.
    pub fn directory(&self) -> &str {
        match self.relative_path.rfind('/') {
            Some(idx) => &self.relative_path[..=idx],
            None => "",
        }
    }
}

/// Relative paths stored under one site, listed at most once.
pub struct SiteListing {
    storage: Arc<dyn ObjectStore>,
    prefix: String,
    files: Option<Vec<String>>,
}

impl SiteListing {
    pub fn new(storage: Arc<dyn ObjectStore>, site_id: &SiteId) -> Self {
        Self {
            storage,
            prefix: site_prefix(site_id),
            files: None,
        }
    }

    /// Sorted relative paths of every stored file.
    pub async fn files(&mut self) -> StorageResult<&[String]> {
        if self.files.is_none() {
            let keys = self.storage.list(&self.prefix).await?;
            let mut files: Vec<String> = keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
                .filter(|k| !k.is_empty())
                .collect();
            files.sort();
            self.files = Some(files);
        }
        Ok(self.files.as_deref().unwrap_or_default())
    }
}

/// Maps `(site, requested path)` to a stored object.
pub struct Resolver {
    storage: Arc<dyn ObjectStore>,
    entry_document: String,
    assets_prefix: String,
}

impl Resolver {
    pub fn new(storage: Arc<dyn ObjectStore>, config: &ProxyConfig) -> Self {
        Self {
            storage,
            entry_document: config.entry_document.clone(),
            assets_prefix: config.assets_prefix.clone(),
        }
    }

    pub fn entry_document(&self) -> &str {
        &self.entry_document
    }

    /// Start a lazily-filled listing for `site_id`.
    pub fn listing(&self, site_id: &SiteId) -> SiteListing {
        SiteListing::new(self.storage.clone(), site_id)
    }

    /// Resolve with a fresh listing.
    pub async fn resolve(
        &self,
        site_id: &SiteId,
        requested: &str,
    ) -> StorageResult<Option<ResolveResult>> {
        let mut listing = self.listing(site_id);
        self.resolve_with(site_id, requested, &mut listing).await
    }

    /// Resolve `requested`, reusing `listing` across strategies.
    ///
    /// `Ok(None)` means not found. Errors are blob store failures only.
    #[tracing::instrument(skip(self, listing), fields(site_id = %site_id))]
    pub async fn resolve_with(
        &self,
        site_id: &SiteId,
        requested: &str,
        listing: &mut SiteListing,
    ) -> StorageResult<Option<ResolveResult>> {
        let requested = requested.trim_start_matches('/');
        if requested.is_empty() {
            return self.entry(site_id, listing).await;
        }

        let path = match UploadPath::parse(requested) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(requested = %requested, error = %e, "Rejected request path");
                return Ok(None);
            }
        };
        let ext = path.extension();

        for strategy in LOOKUP_ORDER {
            if let Some(relative) = self
                .try_strategy(strategy, site_id, &path, ext.as_deref(), listing)
                .await?
            {
                let is_entry = relative == self.entry_document;
                return Ok(Some(self.hit(site_id, requested, relative, strategy, is_entry)));
            }
        }

        if ext.is_none() {
            return self.entry(site_id, listing).await;
        }

        tracing::debug!(requested = %requested, "No stored file matches request");
        record_resolution("not-found");
        Ok(None)
    }

    /// Locate the entry document: at the root, else the shallowest
    /// `*/{entry_document}` in the listing.
    pub async fn find_entry(
        &self,
        site_id: &SiteId,
        listing: &mut SiteListing,
    ) -> StorageResult<Option<String>> {
        if self.exists(site_id, &self.entry_document).await? {
            return Ok(Some(self.entry_document.clone()));
        }
        let suffix = format!("/{}", self.entry_document);
        let nested = listing
            .files()
            .await?
            .iter()
            .filter(|f| f.ends_with(&suffix))
            .min_by_key(|f| (f.matches('/').count(), f.as_str()))
            .cloned();
        Ok(nested)
    }

    async fn entry(
        &self,
        site_id: &SiteId,
        listing: &mut SiteListing,
    ) -> StorageResult<Option<ResolveResult>> {
        match self.find_entry(site_id, listing).await? {
            Some(relative) => {
                let requested = relative.clone();
                Ok(Some(self.hit(
                    site_id,
                    &requested,
                    relative,
                    Strategy::EntryFallback,
                    true,
                )))
            }
            None => {
                tracing::debug!("Site has no entry document");
                record_resolution("not-found");
                Ok(None)
            }
        }
    }

    async fn try_strategy(
        &self,
        strategy: Strategy,
        site_id: &SiteId,
        path: &UploadPath,
        ext: Option<&str>,
        listing: &mut SiteListing,
    ) -> StorageResult<Option<String>> {
        let requested = path.as_str();
        match strategy {
            Strategy::Exact => self.existing(site_id, requested).await,
            Strategy::Basename => {
                let name = path.basename();
                if name == requested {
                    return Ok(None);
                }
                self.existing(site_id, name).await
            }
            Strategy::StripAssetsPrefix => match requested.strip_prefix(&self.assets_prefix) {
                Some(rest) if !rest.is_empty() => self.existing(site_id, rest).await,
                _ => Ok(None),
            },
            Strategy::SameExtension => {
                let Some(ext) = ext else {
                    return Ok(None);
                };
                let files = listing.files().await?;
                Ok(same_extension_match(files, path.basename(), ext))
            }
            Strategy::EntryFallback => Ok(None),
        }
    }

    async fn existing(&self, site_id: &SiteId, relative: &str) -> StorageResult<Option<String>> {
        Ok(self
            .exists(site_id, relative)
            .await?
            .then(|| relative.to_string()))
    }

    async fn exists(&self, site_id: &SiteId, relative: &str) -> StorageResult<bool> {
        match UploadPath::parse(relative) {
            Ok(path) => self.storage.exists(&object_key(site_id, &path)).await,
            Err(_) => Ok(false),
        }
    }

    fn hit(
        &self,
        site_id: &SiteId,
        requested: &str,
        relative: String,
        strategy: Strategy,
        is_entry: bool,
    ) -> ResolveResult {
        match strategy.confidence() {
            Confidence::High => tracing::debug!(
                requested = %requested,
                resolved = %relative,
                strategy = strategy.as_str(),
                "Resolved request"
            ),
            Confidence::Low => tracing::warn!(
                requested = %requested,
                resolved = %relative,
                strategy = strategy.as_str(),
                "Low-confidence match for request"
            ),
        }
        record_resolution(strategy.as_str());

        ResolveResult {
            key: format!("{}{}", site_prefix(site_id), relative),
            relative_path: relative,
            strategy,
            confidence: strategy.confidence(),
            is_entry,
        }
    }
}

/// Pick a stored file with extension `ext`, preferring one whose name
/// begins with the requested stem (`main.js` matches `main.abc123.js`).
fn same_extension_match(files: &[String], requested_name: &str, ext: &str) -> Option<String> {
    let stem = requested_name
        .strip_suffix(ext)
        .and_then(|s| s.strip_suffix('.'))
        .unwrap_or(requested_name);

    let candidates: Vec<&String> = files
        .iter()
        .filter(|f| extension(f).as_deref() == Some(ext))
        .collect();

    let by_stem = candidates.iter().find(|f| {
        let name = basename(f);
        name.len() > stem.len()
            && name.starts_with(stem)
            && matches!(name.as_bytes()[stem.len()], b'.' | b'-' | b'_')
    });

    by_stem
        .or_else(|| candidates.first())
        .map(|f| (*f).clone())
}
