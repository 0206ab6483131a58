//! Core domain types and shared logic for quay.
//!
//! This crate defines the data model used across all other crates:
//! - Site identifiers, lifecycle status and API summaries
//! - Upload path normalization and object key layout
//! - Extension-driven content types
//! - Upload session state and per-operation result types
//! - Application configuration

pub mod config;
pub mod content_type;
pub mod error;
pub mod path;
pub mod site;
pub mod upload;

pub use content_type::{content_type_for, is_text};
pub use error::{Error, Result};
pub use path::{UploadPath, object_key, site_prefix};
pub use site::{SiteId, SiteStatus, SiteSummary};
pub use upload::{
    FileWriteResult, FinalizeRequest, FinalizeResult, UploadBatchResult, UploadSession,
    UploadSessionView,
};

/// Default entry document served for a site root.
pub const DEFAULT_ENTRY_DOCUMENT: &str = "index.html";

/// Default number of parallel blob writes per chunk batch.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 5;

/// Maximum size of a single uploaded file: 150 MiB
pub const MAX_FILE_SIZE: u64 = 150 * 1024 * 1024;

/// Route prefix under which sites are served.
pub fn proxy_base(site_id: &SiteId) -> String {
    format!("/sites/{site_id}/proxy/")
}
