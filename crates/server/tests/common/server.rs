//! Server test utilities.

use super::fixtures::MultipartForm;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use quay_core::config::{AppConfig, RegistryConfig, TokenConfig};
use quay_registry::{MemorySessionStore, Registry, SqliteStore};
use quay_server::auth::hash_token;
use quay_server::{AppState, create_router};
use quay_storage::{MemoryBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const ALICE_TOKEN: &str = "alice-secret-token";
pub const BOB_TOKEN: &str = "bob-secret-token";

/// A response with its body collected.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// In-memory blob store, SQLite registry in a temp directory.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::with_storage(Arc::new(MemoryBackend::new()), modifier).await
    }

    /// Create a test server over a specific blob store.
    pub async fn with_storage<F>(storage: Arc<dyn ObjectStore>, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("registry.db");

        let mut config = AppConfig::for_testing();
        config.registry = RegistryConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let sites = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create registry"),
        );
        let registry = Registry {
            sites,
            sessions: Arc::new(MemorySessionStore::new()),
        };

        let state = AppState::new(config, storage, registry);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Tokens for owners `alice` and `bob`, optionally required.
    pub async fn with_tokens(require_token: bool) -> Self {
        Self::with_config(|config| {
            config.auth.require_token = require_token;
            config.auth.tokens = vec![
                TokenConfig {
                    owner: "alice".to_string(),
                    token_hash: hash_token(ALICE_TOKEN),
                },
                TokenConfig {
                    owner: "bob".to_string(),
                    token_hash: hash_token(BOB_TOKEN),
                },
            ];
        })
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    pub async fn upload(&self, form: MultipartForm, token: Option<&str>) -> TestResponse {
        let mut builder = Request::post("/sites/upload-folder")
            .header("Content-Type", form.content_type());
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(form.into_body()).unwrap()).await
    }

    pub async fn finalize(&self, body: Value, token: Option<&str>) -> TestResponse {
        self.request("POST", "/sites/finalize-upload", Some(body), token)
            .await
    }

    /// Upload `files` in one direct (non-chunked) request and return the site id.
    pub async fn deploy(&self, files: &[(&str, &str)]) -> String {
        let response = self.upload(MultipartForm::new().files(files), None).await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.text());
        response.json()["siteId"].as_str().unwrap().to_string()
    }
}
