//! Integration tests for the resolving proxy and entry document rewriting.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{CRA_SITE, FailingStore, MultipartForm, PLAIN_SITE, TestServer, VITE_SITE};
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_raw_serves_rewritten_cra_entry() {
    let server = TestServer::new().await;
    let site_id = server.deploy(CRA_SITE).await;
    let base = format!("/sites/{site_id}/proxy/");

    let response = server.get(&format!("/sites/{site_id}/raw")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header("content-type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(response.header("cache-control"), Some("no-cache"));
    assert_eq!(response.header("x-resolve-strategy"), Some("entry"));

    let html = response.text();
    assert!(html.contains(&format!(r#"<base href="{base}">"#)));
    assert!(html.contains(&format!(
        r#"<script src="{base}static/js/main.3f2a1b9c.js" defer>"#
    )));
    assert!(html.contains(&format!(r#"href="{base}static/css/main.8e1f0a2d.css""#)));
    assert!(html.contains(&format!(r#"href="{base}favicon.ico""#)));
}

#[tokio::test]
async fn test_rewrite_is_idempotent_across_requests() {
    let server = TestServer::new().await;
    let site_id = server.deploy(CRA_SITE).await;
    let first = server.get(&format!("/sites/{site_id}/raw")).await.text();

    // Store the rewritten document in place of the original
    let response = server
        .upload(
            MultipartForm::new()
                .text("siteId", &site_id)
                .file("index.html", first.as_bytes()),
            None,
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let second = server.get(&format!("/sites/{site_id}/raw")).await.text();
    assert_eq!(first, second);
    assert_eq!(second.matches("<base ").count(), 1);
    assert_eq!(second.matches(" defer").count(), 1);
}

#[tokio::test]
async fn test_proxy_root_and_bare_prefix_serve_entry() {
    let server = TestServer::new().await;
    let site_id = server.deploy(PLAIN_SITE).await;

    for uri in [
        format!("/sites/{site_id}/proxy/"),
        format!("/sites/{site_id}/proxy"),
    ] {
        let response = server.get(&uri).await;
        assert_eq!(response.status, StatusCode::OK, "{uri}");
        assert!(response.text().contains("<title>Plain</title>"));
    }
}

#[tokio::test]
async fn test_exact_match_with_cache_headers() {
    let server = TestServer::new().await;
    let site_id = server.deploy(CRA_SITE).await;

    let hashed = server
        .get(&format!("/sites/{site_id}/proxy/static/js/main.3f2a1b9c.js"))
        .await;
    assert_eq!(hashed.status, StatusCode::OK);
    assert_eq!(hashed.text(), "console.log('cra');");
    assert_eq!(hashed.header("x-resolve-strategy"), Some("exact"));
    assert_eq!(
        hashed.header("content-type"),
        Some("application/javascript")
    );
    assert_eq!(
        hashed.header("cache-control"),
        Some("public, max-age=31536000, immutable")
    );

    let plain = server
        .get(&format!("/sites/{site_id}/proxy/manifest.json"))
        .await;
    assert_eq!(plain.status, StatusCode::OK);
    assert_eq!(plain.header("cache-control"), Some("public, max-age=300"));
    assert_eq!(plain.header("content-type"), Some("application/json"));
}

#[tokio::test]
async fn test_binary_files_are_streamed() {
    let server = TestServer::new().await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let response = server
        .get(&format!("/sites/{site_id}/proxy/images/photo.jpg"))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("image/jpeg"));
    assert_eq!(&response.body[..], b"jpg");
}

#[tokio::test]
async fn test_basename_fallback() {
    let server = TestServer::new().await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let response = server
        .get(&format!("/sites/{site_id}/proxy/some/deep/route/style.css"))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-resolve-strategy"), Some("basename"));
    assert_eq!(response.text(), "h1{}");
}

#[tokio::test]
async fn test_assets_prefix_is_stripped() {
    let server = TestServer::new().await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let response = server
        .get(&format!("/sites/{site_id}/proxy/assets/images/photo.jpg"))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header("x-resolve-strategy"),
        Some("strip-assets-prefix")
    );
}

#[tokio::test]
async fn test_same_extension_is_last_resort() {
    let server = TestServer::new().await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let response = server.get(&format!("/sites/{site_id}/proxy/bundle.js")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-resolve-strategy"), Some("same-extension"));
    assert_eq!(response.text(), "app()");
}

#[tokio::test]
async fn test_client_routes_fall_back_to_entry() {
    let server = TestServer::new().await;
    let site_id = server.deploy(CRA_SITE).await;

    let response = server
        .get(&format!("/sites/{site_id}/proxy/dashboard/settings"))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-resolve-strategy"), Some("entry"));
    assert!(response.text().contains("<base href="));
}

#[tokio::test]
async fn test_missing_file_with_extension_is_not_found() {
    let server = TestServer::new().await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let response = server
        .get(&format!("/sites/{site_id}/proxy/fonts/missing.woff2"))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "not_found");
}

#[tokio::test]
async fn test_unknown_and_malformed_sites_are_not_found() {
    let server = TestServer::new().await;

    for uri in [
        "/sites/site-missing/raw",
        "/sites/site-missing/proxy/app.js",
        "/sites/not.valid/raw",
    ] {
        assert_eq!(server.get(uri).await.status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn test_traversal_does_not_escape_site() {
    let server = TestServer::new().await;
    let secret = server.deploy(&[("secret.txt", "top secret")]).await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let response = server
        .get(&format!("/sites/{site_id}/proxy/..%2F{secret}%2Fsecret.txt"))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sites_with_shared_prefix_stay_isolated() {
    let server = TestServer::new().await;
    for (id, body) in [("site1", "one"), ("site10", "ten")] {
        let response = server
            .upload(
                MultipartForm::new()
                    .text("siteId", id)
                    .file("index.html", body.as_bytes())
                    .file(&format!("only-{id}.txt"), body.as_bytes()),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::OK);
    }

    let response = server.get("/sites/site1/proxy/only-site10.txt").await;
    assert_eq!(response.header("x-resolve-strategy"), Some("same-extension"));
    assert_eq!(response.text(), "one");
}

#[tokio::test]
async fn test_nested_entry_is_found() {
    let server = TestServer::new().await;
    let site_id = server
        .deploy(&[
            (
                "dist/index.html",
                r#"<html><head></head><body><script src="/app.js"></script></body></html>"#,
            ),
            ("dist/app.js", "run()"),
        ])
        .await;
    let base = format!("/sites/{site_id}/proxy/dist/");

    let response = server.get(&format!("/sites/{site_id}/raw")).await;
    assert_eq!(response.status, StatusCode::OK);
    let html = response.text();
    assert!(html.contains(&format!(r#"<base href="{base}">"#)));
    assert!(html.contains(&format!(r#"src="{base}app.js""#)));

    let site = server.get(&format!("/sites/{site_id}")).await;
    assert_eq!(site.json()["status"], "active");
}

#[tokio::test]
async fn test_site_without_entry_is_not_found() {
    let server = TestServer::new().await;
    let site_id = server.deploy(&[("readme.txt", "hi")]).await;

    let response = server.get(&format!("/sites/{site_id}/raw")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let file = server
        .get(&format!("/sites/{site_id}/proxy/readme.txt"))
        .await;
    assert_eq!(file.status, StatusCode::OK);
}

#[tokio::test]
async fn test_vite_missing_bundle_uses_stored_stylesheet() {
    let server = TestServer::new().await;
    let site_id = server.deploy(VITE_SITE).await;
    let base = format!("/sites/{site_id}/proxy/");

    let html = server.get(&format!("/sites/{site_id}/raw")).await.text();
    assert!(html.contains(&format!(r#"src="{base}assets/index-a1b2c3d4.js""#)));
    assert!(html.contains(&format!(r#"href="{base}assets/index-5e6f7a8b.css""#)));
    assert!(!html.contains("index-9f8e7d6c.css"));
}

#[tokio::test]
async fn test_rewrite_can_be_disabled() {
    let server = TestServer::with_config(|config| config.proxy.rewrite_html = false).await;
    let site_id = server.deploy(CRA_SITE).await;

    let html = server.get(&format!("/sites/{site_id}/raw")).await.text();
    assert_eq!(html, CRA_SITE[0].1);
}

#[tokio::test]
async fn test_non_entry_html_is_served_verbatim() {
    let server = TestServer::new().await;
    let page = r#"<html><head></head><body><a href="/index.html">home</a></body></html>"#;
    let site_id = server
        .deploy(&[("index.html", "<html><head></head></html>"), ("about.html", page)])
        .await;

    let response = server
        .get(&format!("/sites/{site_id}/proxy/about.html"))
        .await;
    assert_eq!(response.text(), page);
    assert_eq!(response.header("cache-control"), Some("public, max-age=300"));
}

#[tokio::test]
async fn test_serving_routes_send_cors_and_csp() {
    let server = TestServer::new().await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let response = server
        .send(
            Request::get(format!("/sites/{site_id}/proxy/style.css"))
                .header("Origin", "https://embedder.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    let csp = response.header("content-security-policy").unwrap();
    assert_eq!(csp, server.state.config.proxy.content_security_policy);

    let preflight = server
        .send(
            Request::options(format!("/sites/{site_id}/proxy/style.css"))
                .header("Origin", "https://embedder.example")
                .header("Access-Control-Request-Method", "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(preflight.status.is_success());
    assert_eq!(preflight.header("access-control-allow-origin"), Some("*"));
}

#[tokio::test]
async fn test_custom_content_security_policy() {
    let server = TestServer::with_config(|config| {
        config.proxy.content_security_policy = "default-src 'self'".to_string();
    })
    .await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let response = server.get(&format!("/sites/{site_id}/raw")).await;
    assert_eq!(
        response.header("content-security-policy"),
        Some("default-src 'self'")
    );
}

#[tokio::test]
async fn test_chunked_cra_upload_is_served_after_finalize() {
    let server = TestServer::new().await;
    let site_id = "site-cra-e2e";

    for (n, files) in [(1, &CRA_SITE[..3]), (2, &CRA_SITE[3..])] {
        let response = server
            .upload(
                MultipartForm::new()
                    .text("siteId", site_id)
                    .text("chunkNumber", &n.to_string())
                    .text("totalChunks", "2")
                    .files(files),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::OK);
    }
    let finalized = server
        .finalize(serde_json::json!({"siteId": site_id, "siteName": "CRA"}), None)
        .await;
    assert_eq!(finalized.json()["complete"], true);

    let html = server.get(&format!("/sites/{site_id}/raw")).await.text();
    assert!(html.contains(&format!(
        r#"src="/sites/{site_id}/proxy/static/js/main.3f2a1b9c.js""#
    )));

    let logo = server
        .get(&format!("/sites/{site_id}/proxy/static/media/logo.6ce24c58.svg"))
        .await;
    assert_eq!(logo.status, StatusCode::OK);
    assert_eq!(logo.header("content-type"), Some("image/svg+xml"));
}

#[tokio::test]
async fn test_backend_read_failure_is_server_error_not_404() {
    let storage = Arc::new(FailingStore::when(|_| false));
    let server = TestServer::with_storage(storage.clone(), |_| {}).await;
    let site_id = server.deploy(PLAIN_SITE).await;

    let ok = server.get(&format!("/sites/{site_id}/proxy/assets/app.js")).await;
    assert_eq!(ok.status, StatusCode::OK);

    storage.fail_reads.store(true, Ordering::SeqCst);
    for path in ["assets/app.js", "", "dashboard/settings"] {
        let response = server
            .get(&format!("/sites/{site_id}/proxy/{path}"))
            .await;
        assert_eq!(
            response.status,
            StatusCode::INTERNAL_SERVER_ERROR,
            "path {path:?}"
        );
        let body = response.json();
        assert_eq!(body["error"], "storage_error");
        assert!(body["message"].as_str().unwrap().contains("backend unreachable"));
    }
}

#[tokio::test]
async fn test_javascript_type_ignores_content() {
    let server = TestServer::new().await;
    let site_id = server
        .deploy(&[
            ("index.html", "<html><body>x</body></html>"),
            ("app.js", "<!doctype html><p>not really markup</p>"),
        ])
        .await;

    let response = server.get(&format!("/sites/{site_id}/proxy/app.js")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.header("content-type"),
        Some("application/javascript")
    );
}
