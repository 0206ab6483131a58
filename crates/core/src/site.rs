//! Site identity, lifecycle and API summaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum length of a site identifier.
const MAX_SITE_ID_LEN: usize = 128;

/// Storage-folder key identifying a site.
///
/// Site ids become the first segment of every stored object key, so they are
/// restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteId(String);

impl SiteId {
    /// Generate a new random site id.
    pub fn generate() -> Self {
        Self(format!("site-{}", Uuid::new_v4().simple()))
    }

    /// Parse and validate a caller-supplied site id.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::Error::InvalidSiteId("empty".to_string()));
        }
        if s.len() > MAX_SITE_ID_LEN {
            return Err(crate::Error::InvalidSiteId(format!(
                "longer than {MAX_SITE_ID_LEN} characters"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::Error::InvalidSiteId(format!(
                "{s:?} contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SiteId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<SiteId> for String {
    fn from(id: SiteId) -> Self {
        id.0
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({})", self.0)
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Site lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// Upload in progress, not finalized yet.
    Draft,
    /// Finalized and servable.
    Active,
    /// Finalized without any stored content.
    Failed,
}

impl SiteStatus {
    /// Parse from the stored string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InvalidStatus(other.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Site as returned by the HTTP API.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub id: SiteId,
    pub name: String,
    /// Entry URL routed through the proxy.
    pub url: String,
    pub status: SiteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Direct Blob Store URL of the entry document, when the backend issues one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    pub file_count: u64,
    /// Whether the last finalize saw every expected chunk.
    #[serde(default)]
    pub upload_complete: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SiteSummary {
    /// Provisional summary for a site whose upload has not been finalized.
    pub fn draft(id: SiteId, name: String, url: String, owner_id: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            name,
            url,
            status: SiteStatus::Draft,
            owner_id,
            storage_url: None,
            file_count: 0,
            upload_complete: false,
            created_at: now,
            updated_at: now,
        }
    }
}
