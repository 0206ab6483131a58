//! Test fixtures: multipart bodies and sample site bundles.

use axum::body::Body;

const BOUNDARY: &str = "quay-test-boundary-7MA4YWxkTrZu0gW";

/// Builder for `multipart/form-data` request bodies.
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

#[allow(dead_code)]
impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    /// Add a file field named `files`, sending its relative path in a
    /// matching `paths` field the way a browser folder picker client does.
    pub fn file(self, path: &str, data: &[u8]) -> Self {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let mut form = self.text("paths", path);
        form.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; \
                 filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        form.body.extend_from_slice(data);
        form.body.extend_from_slice(b"\r\n");
        form
    }

    /// Add several files at once.
    pub fn files<'a>(self, files: impl IntoIterator<Item = &'a (&'a str, &'a str)>) -> Self {
        files
            .into_iter()
            .fold(self, |form, (path, content)| form.file(path, content.as_bytes()))
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    pub fn into_body(mut self) -> Body {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(self.body)
    }
}

/// A Create React App build.
#[allow(dead_code)]
pub const CRA_SITE: &[(&str, &str)] = &[
    (
        "index.html",
        r#"<!doctype html><html lang="en"><head><meta charset="utf-8"><link rel="icon" href="/favicon.ico"><title>React App</title><script src="/static/js/main.3f2a1b9c.js"></script><link href="/static/css/main.8e1f0a2d.css" rel="stylesheet"></head><body><div id="root"></div></body></html>"#,
    ),
    ("favicon.ico", "icon"),
    ("static/js/main.3f2a1b9c.js", "console.log('cra');"),
    ("static/css/main.8e1f0a2d.css", "body{margin:0}"),
    ("static/media/logo.6ce24c58.svg", "<svg></svg>"),
    ("manifest.json", r#"{"short_name":"React App"}"#),
];

/// A Vite build whose HTML references an asset name that was never uploaded.
#[allow(dead_code)]
pub const VITE_SITE: &[(&str, &str)] = &[
    (
        "index.html",
        r#"<!doctype html><html><head><script type="module" crossorigin src="/assets/index-a1b2c3d4.js"></script><link rel="stylesheet" href="/assets/index-9f8e7d6c.css"></head><body><div id="app"></div></body></html>"#,
    ),
    ("assets/index-a1b2c3d4.js", "import './x';"),
    ("assets/index-5e6f7a8b.css", "#app{color:red}"),
    ("assets/hero-1a2b3c4d.png", "png"),
];

/// A site with no bundler markers and a nested layout.
#[allow(dead_code)]
pub const PLAIN_SITE: &[(&str, &str)] = &[
    (
        "index.html",
        r#"<html><head><title>Plain</title><link rel="stylesheet" href="/style.css"></head><body><img src="images/photo.jpg"></body></html>"#,
    ),
    ("style.css", "h1{}"),
    ("images/photo.jpg", "jpg"),
    ("assets/app.js", "app()"),
    ("docs/guide.txt", "guide"),
];
