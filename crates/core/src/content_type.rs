//! Content-Type lookup for served and stored files.

/// Fallback type for unknown extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Extensions whose type must not depend on the platform MIME database.
const OVERRIDES: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("cjs", "application/javascript"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("webmanifest", "application/manifest+json"),
    ("txt", "text/plain; charset=utf-8"),
    ("xml", "application/xml"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("wasm", "application/wasm"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mp3", "audio/mpeg"),
    ("pdf", "application/pdf"),
];

/// Content type for a path, by extension.
///
/// Explicit overrides win; other extensions go through `mime_guess`; anything
/// unknown is `application/octet-stream`.
pub fn content_type_for(path: &str) -> String {
    let Some(ext) = crate::path::extension(path) else {
        return OCTET_STREAM.to_string();
    };
    if let Some((_, ty)) = OVERRIDES.iter().find(|(e, _)| *e == ext) {
        return (*ty).to_string();
    }
    mime_guess::from_ext(&ext)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Whether a content type is textual and should be decoded before serving.
pub fn is_text(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/")
        || matches!(
            essence.as_str(),
            "application/javascript"
                | "application/json"
                | "application/xml"
                | "application/manifest+json"
                | "image/svg+xml"
        )
}

/// Whether a content type is HTML.
pub fn is_html(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|e| e.trim().eq_ignore_ascii_case("text/html"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        assert_eq!(content_type_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(
            content_type_for("static/js/main.abc.js"),
            "application/javascript"
        );
        assert_eq!(content_type_for("chunk.MJS"), "application/javascript");
        assert_eq!(content_type_for("main.css"), "text/css; charset=utf-8");
        assert_eq!(content_type_for("a/b/font.WOFF2"), "font/woff2");
        assert_eq!(content_type_for("favicon.ico"), "image/x-icon");
    }

    #[test]
    fn test_unknown_is_octet_stream() {
        assert_eq!(content_type_for("blob.zzzunknown"), OCTET_STREAM);
        assert_eq!(content_type_for("LICENSE"), OCTET_STREAM);
    }

    #[test]
    fn test_mime_guess_fallback() {
        assert_eq!(content_type_for("doc.csv"), "text/csv");
    }

    #[test]
    fn test_is_text() {
        assert!(is_text("text/html; charset=utf-8"));
        assert!(is_text("application/javascript; charset=utf-8"));
        assert!(is_text("image/svg+xml"));
        assert!(!is_text("image/png"));
        assert!(!is_text(OCTET_STREAM));
        assert!(is_html("text/html; charset=utf-8"));
        assert!(!is_html("text/css"));
    }
}
