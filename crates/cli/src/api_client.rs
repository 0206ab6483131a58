use anyhow::{Context, Result};
use quay_core::{
    FinalizeRequest, FinalizeResult, SiteSummary, UploadBatchResult, UploadSessionView,
};
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Per-request timeout; single files may be up to 150 MB.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Delays between attempts after a transport error or 5xx response.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_delays(vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(6),
        ])
    }
}

impl RetryPolicy {
    pub fn with_delays(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Single attempt.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }
}

/// One file of a chunk, addressed by its path relative to the bundle root.
#[derive(Clone, Debug)]
pub struct ChunkFile {
    pub path: String,
    pub data: Vec<u8>,
}

/// One `upload-folder` request.
#[derive(Clone, Debug, Default)]
pub struct UploadChunk {
    pub site_id: Option<String>,
    pub site_name: Option<String>,
    /// `(chunk_number, total_chunks)`; `None` uploads and finalizes in one request.
    pub chunk: Option<(u32, u32)>,
    pub files: Vec<ChunkFile>,
}

impl UploadChunk {
    fn to_form(&self) -> Form {
        let mut form = Form::new();
        if let Some(site_id) = &self.site_id {
            form = form.text("siteId", site_id.clone());
        }
        if let Some(name) = &self.site_name {
            form = form.text("siteName", name.clone());
        }
        if let Some((number, total)) = self.chunk {
            form = form
                .text("chunkNumber", number.to_string())
                .text("totalChunks", total.to_string());
        }
        for file in &self.files {
            let file_name = file.path.rsplit('/').next().unwrap_or(&file.path).to_string();
            form = form.text("paths", file.path.clone()).part(
                "files",
                Part::bytes(file.data.clone()).file_name(file_name),
            );
        }
        form
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token: token.map(str::to_string),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send with retries on transport errors and 5xx responses.
    ///
    /// `make_request` is called once per attempt since multipart bodies
    /// cannot be replayed.
    async fn send_with_retry<F>(&self, mut make_request: F) -> Result<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let result = self.authorize(make_request()).send().await;
            let delay = self.retry.delays.get(attempt).copied();
            match (result, delay) {
                (Ok(response), Some(delay)) if response.status().is_server_error() => {
                    tracing::warn!(status = %response.status(), attempt = attempt + 1, "Server error, retrying");
                    eprintln!(
                        "  Server error ({}), retrying in {}s...",
                        response.status(),
                        delay.as_secs_f32()
                    );
                    tokio::time::sleep(delay).await;
                }
                (Ok(response), _) => return Ok(response),
                (Err(e), Some(delay)) => {
                    tracing::warn!(error = %e, attempt = attempt + 1, "Request failed, retrying");
                    eprintln!("  Request error ({e}), retrying in {}s...", delay.as_secs_f32());
                    tokio::time::sleep(delay).await;
                }
                (Err(e), None) => return Err(e).context("request failed"),
            }
            attempt += 1;
        }
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        serde_json::from_str(&body).with_context(|| format!("unexpected response body: {body}"))
    }

    pub async fn upload_chunk(&self, chunk: &UploadChunk) -> Result<UploadBatchResult> {
        let url = self.url("/sites/upload-folder")?;
        let response = self
            .send_with_retry(|| self.http.post(url.clone()).multipart(chunk.to_form()))
            .await?;
        Self::read_json(response).await
    }

    pub async fn finalize(&self, request: &FinalizeRequest) -> Result<FinalizeResult> {
        let url = self.url("/sites/finalize-upload")?;
        let response = self
            .send_with_retry(|| self.http.post(url.clone()).json(request))
            .await?;
        Self::read_json(response).await
    }

    /// Progress of an unfinished upload; `None` when the server has no session.
    pub async fn upload_session(&self, site_id: &str) -> Result<Option<UploadSessionView>> {
        let url = self.url(&format!("/sites/{site_id}/upload-session"))?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).await.map(Some)
    }

    pub async fn get_site(&self, site_id: &str) -> Result<SiteSummary> {
        let url = self.url(&format!("/sites/{site_id}"))?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        Self::read_json(response).await
    }

    pub async fn delete_site(&self, site_id: &str) -> Result<DeleteSiteResponse> {
        let url = self.url(&format!("/sites/{site_id}"))?;
        let response = self
            .send_with_retry(|| self.http.delete(url.clone()))
            .await?;
        Self::read_json(response).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/health")?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        Self::read_json(response).await
    }
}

// =============================================================================
// Response types not shared through quay-core
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSiteResponse {
    pub success: bool,
    pub site_id: String,
    pub objects_deleted: u64,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
