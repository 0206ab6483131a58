//! Entry document rewriting for path-prefixed serving.
//!
//! Sites are served under `/sites/{id}/proxy/`, so root-relative references
//! in a stored `index.html` point at the wrong place. Rewriting injects a
//! `<base>` element and then applies bundler-specific fixes selected by
//! [`Bundler::detect`]. Every pass is idempotent: values already under the
//! proxy prefix are left alone and injected markup is only added once.

pub mod cra;
pub mod vite;

use quay_core::path::basename;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static CRA_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/static/(?:js|css)/").expect("valid regex"));

static VITE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:src|href)\s*=\s*["'][^"']*assets/[^"'/]+-[A-Za-z0-9_-]{8}\.(?:js|css)["']"#)
        .expect("valid regex")
});

static REF_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(src|href)(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static HEAD_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head\b[^>]*>").expect("valid regex"));

static HTML_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<html\b[^>]*>").expect("valid regex"));

static BASE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<base\b").expect("valid regex"));

static HEAD_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</head\s*>").expect("valid regex"));

static CONTENT_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)[-.]([A-Za-z0-9_-]{8})$").expect("valid regex"));

/// Build tool convention recognized in an entry document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bundler {
    /// Create React App: `/static/js/`, `/static/css/`.
    Cra,
    /// Vite: hashed `assets/name-HASH.js`.
    Vite,
    Generic,
}

impl Bundler {
    pub fn detect(html: &str) -> Self {
        if CRA_MARKER.is_match(html) {
            Self::Cra
        } else if VITE_MARKER.is_match(html) {
            Self::Vite
        } else {
            Self::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cra => "cra",
            Self::Vite => "vite",
            Self::Generic => "generic",
        }
    }
}

/// What a rewrite can see of the site.
pub struct RewriteContext<'a> {
    /// Value of the injected `<base href>`, with trailing slash.
    pub base_href: String,
    /// Stored files relative to the entry document's directory, sorted.
    pub files: &'a [String],
}

impl RewriteContext<'_> {
    pub fn has_file(&self, relative: &str) -> bool {
        self.files.binary_search_by(|f| f.as_str().cmp(relative)).is_ok()
    }

    /// Absolute proxy URL for a file relative to the base.
    pub fn proxied(&self, relative: &str) -> String {
        format!("{}{}", self.base_href, relative.trim_start_matches('/'))
    }

    /// The site's `/sites/{id}/proxy/` prefix, without any entry directory.
    fn proxy_root(&self) -> &str {
        let end = self
            .base_href
            .strip_prefix("/sites/")
            .and_then(|rest| rest.find('/'))
            .map(|id_len| "/sites/".len() + id_len + "/proxy/".len());
        match end.and_then(|end| self.base_href.get(..end)) {
            Some(root) if root.ends_with("/proxy/") => root,
            _ => &self.base_href,
        }
    }

    /// Whether `value` should never be touched.
    pub fn is_fixed(&self, value: &str) -> bool {
        let lower = value.trim().to_ascii_lowercase();
        value.starts_with(&self.base_href)
            || value.starts_with(self.proxy_root())
            || lower.is_empty()
            || lower.starts_with("//")
            || lower.starts_with('#')
            || ["http:", "https:", "data:", "blob:", "mailto:", "javascript:"]
                .iter()
                .any(|scheme| lower.starts_with(scheme))
    }
}

/// One reference changed by a rewrite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Substitution {
    pub from: String,
    pub to: String,
    pub rule: &'static str,
}

impl Substitution {
    pub fn new(from: impl Into<String>, to: impl Into<String>, rule: &'static str) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            rule,
        }
    }
}

/// Rewritten document plus what changed.
#[derive(Clone, Debug)]
pub struct Rewritten {
    pub html: String,
    pub bundler: Bundler,
    pub substitutions: Vec<Substitution>,
}

/// Bundler-specific reference fixes, applied before `<base>` injection.
pub trait RewriteStrategy: Send + Sync {
    fn bundler(&self) -> Bundler;

    fn rewrite(
        &self,
        html: &str,
        ctx: &RewriteContext<'_>,
        substitutions: &mut Vec<Substitution>,
    ) -> String;
}

/// Only fixes root-relative references to files that exist.
pub struct GenericStrategy;

impl RewriteStrategy for GenericStrategy {
    fn bundler(&self) -> Bundler {
        Bundler::Generic
    }

    fn rewrite(
        &self,
        html: &str,
        ctx: &RewriteContext<'_>,
        substitutions: &mut Vec<Substitution>,
    ) -> String {
        rewrite_refs(html, |value| {
            let to = root_relative_existing(value, ctx)?;
            substitutions.push(Substitution::new(value, to.clone(), "root-relative"));
            Some(to)
        })
    }
}

fn strategy_for(bundler: Bundler) -> &'static dyn RewriteStrategy {
    match bundler {
        Bundler::Cra => &cra::CraStrategy,
        Bundler::Vite => &vite::ViteStrategy,
        Bundler::Generic => &GenericStrategy,
    }
}

/// Rewrite an entry document for serving under `ctx.base_href`.
pub fn rewrite_entry(html: &str, ctx: &RewriteContext<'_>) -> Rewritten {
    let bundler = Bundler::detect(html);
    let strategy = strategy_for(bundler);
    let mut substitutions = Vec::new();

    let rewritten = strategy.rewrite(html, ctx, &mut substitutions);
    let rewritten = inject_base(&rewritten, &ctx.base_href, &mut substitutions);

    for s in &substitutions {
        tracing::info!(
            bundler = strategy.bundler().as_str(),
            rule = s.rule,
            from = %s.from,
            to = %s.to,
            "Rewrote entry document reference"
        );
    }

    Rewritten {
        html: rewritten,
        bundler,
        substitutions,
    }
}

/// Insert `<base href>` right after `<head>` unless the document has one.
pub fn inject_base(html: &str, base_href: &str, substitutions: &mut Vec<Substitution>) -> String {
    if BASE_TAG.is_match(html) {
        return html.to_string();
    }
    let tag = format!(r#"<base href="{base_href}">"#);

    let (at, insert) = if let Some(m) = HEAD_OPEN.find(html) {
        (m.end(), tag.clone())
    } else if let Some(m) = HTML_OPEN.find(html) {
        (m.end(), format!("<head>{tag}</head>"))
    } else {
        (0, format!("<head>{tag}</head>"))
    };

    let mut out = String::with_capacity(html.len() + insert.len());
    out.push_str(&html[..at]);
    out.push_str(&insert);
    out.push_str(&html[at..]);
    substitutions.push(Substitution::new("", tag, "base"));
    out
}

/// Insert `markup` before `</head>`, or append it when there is no head.
pub(crate) fn insert_before_head_close(html: &str, markup: &str) -> String {
    match HEAD_CLOSE.find(html) {
        Some(m) => format!("{}{markup}{}", &html[..m.start()], &html[m.start()..]),
        None => format!("{html}{markup}"),
    }
}

/// Apply `f` to every `src`/`href` attribute value; `None` keeps the original.
pub(crate) fn rewrite_refs(html: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    REF_ATTR
        .replace_all(html, |caps: &Captures<'_>| {
            let (quote, value) = match (caps.get(3), caps.get(4)) {
                (Some(v), _) => ('"', v.as_str()),
                (None, Some(v)) => ('\'', v.as_str()),
                (None, None) => return caps[0].to_string(),
            };
            match f(value) {
                Some(new) => format!("{}{}{quote}{new}{quote}", &caps[1], &caps[2]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Proxy URL for a root-relative reference to a stored file.
pub(crate) fn root_relative_existing(value: &str, ctx: &RewriteContext<'_>) -> Option<String> {
    if ctx.is_fixed(value) || !value.starts_with('/') {
        return None;
    }
    let path = strip_query(value).trim_start_matches('/');
    ctx.has_file(path).then(|| ctx.proxied(value))
}

/// Drop `?query` and `#fragment` from a reference.
pub(crate) fn strip_query(value: &str) -> &str {
    let end = value.find(['?', '#']).unwrap_or(value.len());
    &value[..end]
}

/// Split a file name into its name without the content hash and the hash.
///
/// `index-4f9a8b7c.js` → `("index.js", "4f9a8b7c")`. The hash is the last
/// eight `[A-Za-z0-9_-]` characters of the stem and must contain a digit.
pub fn split_content_hash(file_name: &str) -> Option<(String, String)> {
    let name = basename(file_name);
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };
    let caps = CONTENT_HASH.captures(stem)?;
    let hash = caps.get(2)?.as_str();
    if !hash.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((format!("{}{ext}", &caps[1]), hash.to_string()))
}

/// Whether a file name carries a content hash, either as the stem suffix
/// or as a dotted hex segment (`2.3f2a1b9c.chunk.js`).
pub fn has_content_hash(file_name: &str) -> bool {
    split_content_hash(file_name).is_some()
        || basename(file_name).split('.').skip(1).any(|segment| {
            segment.len() >= 8
                && segment.bytes().all(|b| b.is_ascii_hexdigit())
                && segment.bytes().any(|b| b.is_ascii_digit())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(files: &[String]) -> RewriteContext<'_> {
        RewriteContext {
            base_href: "/sites/s1/proxy/".to_string(),
            files,
        }
    }

    #[test]
    fn test_detect_bundler() {
        assert_eq!(
            Bundler::detect(r#"<script src="/static/js/main.abc.js"></script>"#),
            Bundler::Cra
        );
        assert_eq!(
            Bundler::detect(r#"<script type="module" src="/assets/index-4f9a8b7c.js"></script>"#),
            Bundler::Vite
        );
        assert_eq!(
            Bundler::detect(r#"<script src="app.js"></script>"#),
            Bundler::Generic
        );
    }

    #[test]
    fn test_base_injected_after_head() {
        let mut subs = Vec::new();
        let out = inject_base(
            "<html><head><title>x</title></head></html>",
            "/sites/s1/proxy/",
            &mut subs,
        );
        assert_eq!(
            out,
            r#"<html><head><base href="/sites/s1/proxy/"><title>x</title></head></html>"#
        );
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_base_not_duplicated() {
        let html = r#"<head><BASE href="/x/"></head>"#;
        let mut subs = Vec::new();
        assert_eq!(inject_base(html, "/sites/s1/proxy/", &mut subs), html);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_base_without_head() {
        let mut subs = Vec::new();
        let out = inject_base("<html><body>hi</body></html>", "/p/", &mut subs);
        assert!(out.starts_with(r#"<html><head><base href="/p/"></head><body>"#));
        let out = inject_base("<p>fragment</p>", "/p/", &mut Vec::new());
        assert!(out.starts_with(r#"<head><base href="/p/"></head>"#));
    }

    #[test]
    fn test_generic_rewrites_only_existing_root_relative() {
        let files = vec!["app.js".to_string(), "style.css".to_string()];
        let html = r#"<link href="/style.css"><script src="/app.js?v=2"></script><img src="/gone.png"><a href="https://x.test/app.js">x</a>"#;
        let out = rewrite_entry(html, &ctx(&files));
        assert_eq!(out.bundler, Bundler::Generic);
        assert!(out.html.contains(r#"href="/sites/s1/proxy/style.css""#));
        assert!(out.html.contains(r#"src="/sites/s1/proxy/app.js?v=2""#));
        assert!(out.html.contains(r#"src="/gone.png""#));
        assert!(out.html.contains("https://x.test/app.js"));
    }

    #[test]
    fn test_single_quoted_attributes() {
        let files = vec!["app.js".to_string()];
        let out = rewrite_entry("<script src='/app.js'></script>", &ctx(&files));
        assert!(out.html.contains("src='/sites/s1/proxy/app.js'"));
    }

    #[test]
    fn test_generic_rewrite_is_idempotent() {
        let files = vec!["app.js".to_string()];
        let html = r#"<html><head></head><body><script src="/app.js"></script></body></html>"#;
        let once = rewrite_entry(html, &ctx(&files)).html;
        let twice = rewrite_entry(&once, &ctx(&files));
        assert_eq!(once, twice.html);
        assert!(twice.substitutions.is_empty());
    }

    #[test]
    fn test_only_own_proxy_prefix_counts_as_rewritten() {
        let files = vec!["sites/logo.png".to_string(), "app.js".to_string()];
        let html = r#"<img src="/sites/logo.png"><script src="/sites/s1/proxy/app.js"></script><a href="/sites/other/proxy/app.js">x</a>"#;
        let out = rewrite_entry(html, &ctx(&files));
        assert!(out.html.contains(r#"src="/sites/s1/proxy/sites/logo.png""#));
        assert!(out.html.contains(r#"src="/sites/s1/proxy/app.js""#));
        assert!(out.html.contains(r#"href="/sites/other/proxy/app.js""#));
        assert_eq!(
            out.substitutions
                .iter()
                .filter(|s| s.from == "/sites/logo.png")
                .count(),
            1
        );
    }

    #[test]
    fn test_proxy_root_ignores_entry_directory() {
        let files = vec!["app.js".to_string()];
        let nested = RewriteContext {
            base_href: "/sites/s1/proxy/docs/".to_string(),
            files: &files,
        };
        assert_eq!(nested.proxy_root(), "/sites/s1/proxy/");
        assert!(nested.is_fixed("/sites/s1/proxy/app.js"));
        assert!(!nested.is_fixed("/sites/s1/app.js"));
        assert!(!nested.is_fixed("/sites/s2/proxy/app.js"));
    }

    #[test]
    fn test_split_content_hash() {
        assert_eq!(
            split_content_hash("index-4f9a8b7c.js"),
            Some(("index.js".to_string(), "4f9a8b7c".to_string()))
        );
        assert_eq!(
            split_content_hash("static/media/logo.5d5d9eef.svg"),
            Some(("logo.svg".to_string(), "5d5d9eef".to_string()))
        );
        assert_eq!(split_content_hash("main.abc.js"), None);
        assert_eq!(split_content_hash("component-lightbox.css"), None);
        assert!(has_content_hash("main.3f2a1b9c.chunk.js"));
        assert!(has_content_hash("vendor-D1x_9kQa.js"));
        assert!(!has_content_hash("main.abc.js"));
        assert!(!has_content_hash("favicon.ico"));
    }
}
