//! Relative paths of uploaded files and their object keys.

use crate::site::SiteId;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_PATH_LEN: usize = 1024;

/// A normalized, traversal-free path relative to a site root.
///
/// Backslashes become `/`, leading `./` and `/` are dropped, and empty
/// segments collapse. `.` and `..` segments are rejected outright.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadPath(String);

impl UploadPath {
    pub fn parse(raw: &str) -> crate::Result<Self> {
        if raw.contains('\0') {
            return Err(crate::Error::InvalidPath("contains NUL byte".to_string()));
        }
        let unified = raw.replace('\\', "/");
        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" => continue,
                "." if segments.is_empty() => continue,
                "." | ".." => {
                    return Err(crate::Error::InvalidPath(format!(
                        "{raw:?} contains a relative segment"
                    )));
                }
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Err(crate::Error::InvalidPath("empty path".to_string()));
        }
        let joined = segments.join("/");
        if joined.len() > MAX_PATH_LEN {
            return Err(crate::Error::InvalidPath(format!(
                "longer than {MAX_PATH_LEN} bytes"
            )));
        }
        Ok(Self(joined))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment.
    pub fn basename(&self) -> &str {
        basename(&self.0)
    }

    /// Lowercased extension of the final segment, if any.
    pub fn extension(&self) -> Option<String> {
        extension(&self.0)
    }
}

impl TryFrom<String> for UploadPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<UploadPath> for String {
    fn from(p: UploadPath) -> Self {
        p.0
    }
}

impl fmt::Debug for UploadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadPath({})", self.0)
    }
}

impl fmt::Display for UploadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final `/`-separated segment of a path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Lowercased extension of the last segment. Dotfiles have no extension.
pub fn extension(path: &str) -> Option<String> {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 < name.len() => Some(name[idx + 1..].to_ascii_lowercase()),
        Some(_) => None,
    }
}

/// Key prefix under which every object of a site lives.
pub fn site_prefix(site_id: &SiteId) -> String {
    format!("{site_id}/")
}

/// Object key for a file of a site.
pub fn object_key(site_id: &SiteId, path: &UploadPath) -> String {
    format!("{site_id}/{path}")
}
