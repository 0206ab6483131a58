//! S3-compatible storage backend using AWS SDK.

use crate::backends::filesystem::encode_key;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Maximum keys per DeleteObjects request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Markers carried by lazy-credentials errors so they map to actionable config errors
/// instead of generic S3 transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "quay-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "quay-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// This avoids constructor-time side effects (notably TLS/native-root initialization)
/// in environments where no root certificates are available.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|join_err| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
                    ))
                })
            })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure AWS credentials explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    StorageError::S3(Box::new(err))
}

fn is_404<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    matches!(err, aws_sdk_s3::error::SdkError::ServiceError(service_err)
        if service_err.raw().status().as_u16() == 404)
}

/// Settings for [`S3Backend::new`].
#[derive(Clone, Debug, Default)]
pub struct S3Options {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub prefix: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Use path-style URLs (`endpoint/bucket/key`) instead of virtual-hosted
    /// style (`bucket.endpoint/key`). Required for MinIO.
    pub force_path_style: bool,
    pub public_base_url: Option<String>,
    pub create_bucket: bool,
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Normalized endpoint URL, or None for AWS.
    endpoint: Option<String>,
    region: String,
    force_path_style: bool,
    public_base_url: Option<String>,
    create_bucket: bool,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    pub async fn new(options: S3Options) -> StorageResult<Self> {
        let S3Options {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
            public_base_url,
            create_bucket,
        } = options;

        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "quay-config");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        // Bare host:port endpoints (e.g., "minio:9000") default to http
        let normalized_endpoint = endpoint.map(|endpoint_url| {
            let lower = endpoint_url.to_lowercase();
            let url = if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint_url
            } else {
                format!("http://{endpoint_url}")
            };
            url.trim_end_matches('/').to_string()
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // Plain-HTTP endpoints get an HTTP-only client so SDK setup doesn't need trust roots
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self {
            client,
            bucket,
            // Avoid double-slash keys like "prefix//key"
            prefix: prefix
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            endpoint: normalized_endpoint,
            region: resolved_region,
            force_path_style,
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
            create_bucket,
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Strip the configured prefix from a full object key.
    fn strip_prefix(&self, full_key: &str) -> String {
        match &self.prefix {
            Some(prefix) => full_key
                .strip_prefix(&format!("{prefix}/"))
                .unwrap_or(full_key)
                .to_string(),
            None => full_key.to_string(),
        }
    }

    /// Convert an AWS SDK error to StorageError, mapping 404 to NotFound.
    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if is_404(&err) {
            return StorageError::NotFound(key.to_string());
        }
        map_s3_operation_error(err)
    }

    /// Bucket policy granting anonymous `s3:GetObject` on the site objects.
    fn public_read_policy(&self) -> String {
        let resource = match &self.prefix {
            Some(prefix) => format!("arn:aws:s3:::{}/{prefix}/*", self.bucket),
            None => format!("arn:aws:s3:::{}/*", self.bucket),
        };
        serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "PublicReadSites",
                "Effect": "Allow",
                "Principal": "*",
                "Action": ["s3:GetObject"],
                "Resource": [resource],
            }]
        })
        .to_string()
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let full_key = self.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_404(&err) => Ok(false),
            Err(err) => Err(map_s3_operation_error(err)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let full_key = self.full_key(key);
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let last_modified = output
            .last_modified()
            .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.secs()).ok());

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
            content_type: output.content_type().map(|s| s.to_string()),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let full_key = self.full_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes();

        Ok(bytes)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use futures::StreamExt;

        let full_key = self.full_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|result| result.map_err(StorageError::Io));

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let full_key = self.full_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(content_type)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // delete_object succeeds on missing keys, so check existence first to report NotFound
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(map_s3_operation_error)?;

            for obj in output.contents() {
                if let Some(obj_key) = obj.key() {
                    results.push(self.strip_prefix(obj_key));
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u64> {
        let keys = self.list(prefix).await?;
        let mut removed = 0u64;

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = batch
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(self.full_key(key))
                        .build()
                        .map_err(|e| StorageError::S3(Box::new(e)))
                })
                .collect::<StorageResult<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::S3(Box::new(e)))?;

            let output = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(map_s3_operation_error)?;

            let failed = output.errors().len();
            if failed > 0 {
                return Err(StorageError::S3(
                    format!("{failed} objects under {prefix} could not be deleted").into(),
                ));
            }
            removed += batch.len() as u64;
        }

        Ok(removed)
    }

    fn public_url(&self, key: &str) -> Option<String> {
        let encoded = encode_key(&self.full_key(key));
        if let Some(base) = &self.public_base_url {
            return Some(format!("{base}/{encoded}"));
        }
        match &self.endpoint {
            Some(endpoint) if self.force_path_style => {
                Some(format!("{endpoint}/{}/{encoded}", self.bucket))
            }
            Some(endpoint) => {
                let (scheme, host) = endpoint.split_once("://")?;
                Some(format!("{scheme}://{}.{host}/{encoded}", self.bucket))
            }
            None => Some(format!(
                "https://{}.s3.{}.amazonaws.com/{encoded}",
                self.bucket, self.region
            )),
        }
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn ensure_container(&self) -> StorageResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) if is_404(&err) && self.create_bucket => {}
            Err(err) if is_404(&err) => {
                return Err(StorageError::Config(format!(
                    "bucket {} does not exist and create_bucket is disabled",
                    self.bucket
                )));
            }
            Err(err) => return Err(map_s3_operation_error(err)),
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match request.send().await {
            Ok(_) => tracing::info!(bucket = %self.bucket, "Created bucket"),
            Err(err) => {
                // Lost a creation race with another process
                let owned = err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you());
                if !owned {
                    return Err(map_s3_operation_error(err));
                }
            }
        }

        if let Err(err) = self
            .client
            .put_bucket_policy()
            .bucket(&self.bucket)
            .policy(self.public_read_policy())
            .send()
            .await
        {
            // Some S3-compatible stores reject bucket policies; objects stay reachable via the proxy
            tracing::warn!(
                bucket = %self.bucket,
                error = %err,
                "Failed to apply public-read bucket policy"
            );
        }

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let head_bucket = async {
            match self.client.head_bucket().bucket(&self.bucket).send().await {
                Ok(_) => Ok(()),
                // Not created yet; the first upload creates it
                Err(err) if is_404(&err) && self.create_bucket => Ok(()),
                Err(err) => Err(map_s3_operation_error(err)),
            }
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, head_bucket)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend(prefix: Option<&str>, force_path_style: bool) -> S3Backend {
        S3Backend::new(S3Options {
            bucket: "sites".to_string(),
            endpoint: Some("minio:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: prefix.map(str::to_string),
            access_key_id: Some("access".to_string()),
            secret_access_key: Some("secret".to_string()),
            force_path_style,
            public_base_url: None,
            create_bucket: true,
        })
        .await
        .expect("backend should construct for unit tests")
    }

    #[tokio::test]
    async fn test_full_key_and_strip_prefix() {
        let backend = make_backend(Some("prefix/"), true).await;
        assert_eq!(backend.full_key("site/index.html"), "prefix/site/index.html");
        assert_eq!(backend.strip_prefix("prefix/site/index.html"), "site/index.html");
        assert_eq!(backend.strip_prefix("other/path"), "other/path");

        let backend = make_backend(None, true).await;
        assert_eq!(backend.full_key("site/index.html"), "site/index.html");
    }

    #[tokio::test]
    async fn test_public_url_styles() {
        let path_style = make_backend(None, true).await;
        assert_eq!(
            path_style.public_url("abc/index.html").as_deref(),
            Some("http://minio:9000/sites/abc/index.html")
        );

        let virtual_host = make_backend(Some("p"), false).await;
        assert_eq!(
            virtual_host.public_url("abc/index.html").as_deref(),
            Some("http://sites.minio:9000/p/abc/index.html")
        );

        let aws = S3Backend::new(S3Options {
            bucket: "sites".to_string(),
            region: Some("eu-west-1".to_string()),
            ..S3Options::default()
        })
        .await
        .unwrap();
        assert_eq!(
            aws.public_url("abc/a b.js").as_deref(),
            Some("https://sites.s3.eu-west-1.amazonaws.com/abc/a%20b.js")
        );

        let cdn = S3Backend::new(S3Options {
            bucket: "sites".to_string(),
            public_base_url: Some("https://cdn.example.com/".to_string()),
            ..S3Options::default()
        })
        .await
        .unwrap();
        assert_eq!(
            cdn.public_url("abc/index.html").as_deref(),
            Some("https://cdn.example.com/abc/index.html")
        );
    }

    #[tokio::test]
    async fn test_public_read_policy_scopes_prefix() {
        let backend = make_backend(Some("p"), true).await;
        let policy: serde_json::Value = serde_json::from_str(&backend.public_read_policy()).unwrap();
        assert_eq!(
            policy["Statement"][0]["Resource"][0],
            "arn:aws:s3:::sites/p/*"
        );
        assert_eq!(policy["Statement"][0]["Action"][0], "s3:GetObject");
    }

    #[tokio::test]
    async fn test_s3_new_requires_complete_credentials() {
        let err = S3Backend::new(S3Options {
            bucket: "bucket".to_string(),
            access_key_id: Some("access".to_string()),
            ..S3Options::default()
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn test_s3_new_normalizes_endpoint() {
        let backend = make_backend(Some("prefix"), true).await;
        assert_eq!(backend.endpoint.as_deref(), Some("http://minio:9000"));
        assert_eq!(backend.region, "us-east-1");
    }
}
