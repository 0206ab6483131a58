//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Absolute base URL used when reporting site entry URLs
    /// (e.g., "https://sites.example.com"). Entry URLs are root-relative when unset.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Maximum size of a single uploaded file in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Maximum size of one upload request body in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: u64,
    /// Parallel Blob Store writes per chunk batch.
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_file_size() -> u64 {
    crate::MAX_FILE_SIZE
}

fn default_max_request_size() -> u64 {
    1024 * 1024 * 1024
}

fn default_write_concurrency() -> usize {
    crate::DEFAULT_WRITE_CONCURRENCY
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: None,
            max_file_size: default_max_file_size(),
            max_request_size: default_max_request_size(),
            write_concurrency: default_write_concurrency(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Absolute or root-relative entry URL for a site.
    pub fn site_url(&self, site_id: &crate::SiteId) -> String {
        let path = crate::proxy_base(site_id);
        match &self.public_url {
            Some(base) => format!("{}{path}", base.trim_end_matches('/')),
            None => path,
        }
    }
}

/// Where upload sessions are kept between chunk requests.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    /// In-process concurrent map; sessions are lost on restart.
    #[default]
    Memory,
    /// Persisted alongside site records in the registry database.
    Registry,
}

/// Upload session configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Sessions idle for longer than this are discarded by the sweeper.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Interval between sweeper runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub session_store: SessionStoreKind,
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            session_store: SessionStoreKind::default(),
        }
    }
}

impl UploadConfig {
    /// Get the session TTL as a Duration.
    pub fn session_ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the sweep interval as a std::time::Duration.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Proxy serving configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Document served for a site root and as SPA fallback.
    #[serde(default = "default_entry_document")]
    pub entry_document: String,
    /// Folder prefix stripped by the resolver's prefix strategy.
    #[serde(default = "default_assets_prefix")]
    pub assets_prefix: String,
    /// Content-Security-Policy header set on every served response.
    #[serde(default = "default_content_security_policy")]
    pub content_security_policy: String,
    /// Rewrite entry HTML for the proxy prefix.
    #[serde(default = "default_rewrite_html")]
    pub rewrite_html: bool,
}

fn default_entry_document() -> String {
    crate::DEFAULT_ENTRY_DOCUMENT.to_string()
}

fn default_assets_prefix() -> String {
    "assets/".to_string()
}

fn default_content_security_policy() -> String {
    "default-src * 'unsafe-inline' 'unsafe-eval' data: blob:; \
     script-src * 'unsafe-inline' 'unsafe-eval' data: blob:; \
     style-src * 'unsafe-inline' data:; \
     img-src * data: blob:; \
     font-src * data:; \
     connect-src *"
        .to_string()
}

fn default_rewrite_html() -> bool {
    true
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            entry_document: default_entry_document(),
            assets_prefix: default_assets_prefix(),
            content_security_policy: default_content_security_policy(),
            rewrite_html: default_rewrite_html(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
        /// Base URL under which the root directory is published, if any.
        #[serde(default)]
        public_base_url: Option<String>,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
        /// Base URL for public object links. Derived from endpoint and bucket when unset.
        #[serde(default)]
        public_base_url: Option<String>,
        /// Create the bucket with a public-read policy if it does not exist.
        #[serde(default = "default_create_bucket")]
        create_bucket: bool,
    },
    /// In-process storage (tests and throwaway instances).
    Memory,
}

fn default_create_bucket() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/sites"),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Site registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        /// Logs warnings for queries exceeding this duration.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/registry.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// A bearer token accepted by the server, stored as a hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Owner id the token resolves to.
    pub owner: String,
    /// SHA256 hex of the token (64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Reject mutating requests without a valid bearer token.
    #[serde(default)]
    pub require_token: bool,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), String> {
        for token in &self.tokens {
            if token.owner.trim().is_empty() {
                return Err("auth.tokens entries require a non-empty owner".to_string());
            }
            let digest = hex::decode(&token.token_hash).ok();
            if digest.is_none_or(|bytes| bytes.len() != 32) {
                return Err(format!(
                    "auth token hash for owner '{}' must be 64 hex characters (SHA256)",
                    token.owner
                ));
            }
        }
        if self.require_token && self.tokens.is_empty() {
            return Err("auth.require_token is set but no auth.tokens are configured".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** Uses in-memory storage and sessions; the registry
    /// path still needs to point at a scratch location.
    pub fn for_testing() -> Self {
        Self {
            storage: StorageConfig::Memory,
            registry: RegistryConfig::Sqlite {
                path: PathBuf::from(":memory:"),
                query_timeout_secs: None,
            },
            ..Self::default()
        }
    }

    /// Validate the configuration.
    /// Returns warnings for settings that are risky but allowed,
    /// and errors for settings that would break the server.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.server.write_concurrency == 0 {
            return Err("server.write_concurrency must be at least 1".to_string());
        }
        if self.server.max_file_size == 0 {
            return Err("server.max_file_size cannot be 0".to_string());
        }
        // tokio::time::interval panics on a zero period
        if self.upload.sweep_interval_secs == 0 {
            return Err("upload.sweep_interval_secs cannot be 0".to_string());
        }
        if self.proxy.entry_document.trim().is_empty() {
            return Err("proxy.entry_document cannot be empty".to_string());
        }
        self.storage.validate()?;
        self.auth.validate()?;

        if !self.auth.require_token {
            warnings.push(
                "auth.require_token=false: anyone who can reach the server can upload sites"
                    .to_string(),
            );
        }
        if self.upload.session_ttl_secs < 600 {
            warnings.push(format!(
                "upload.session_ttl_secs={} is very short; slow multi-chunk uploads \
                 may lose their session before finalize",
                self.upload.session_ttl_secs
            ));
        }
        if self.server.max_file_size > self.server.max_request_size {
            warnings.push(
                "server.max_file_size exceeds server.max_request_size; \
                 the request limit applies first"
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}
