//! Create React App entry documents.
//!
//! CRA builds reference `/static/js/...`, `/static/css/...` and sometimes
//! root-relative `main.*` or `*.chunk.js` bundles by absolute path, which a
//! `<base>` element cannot redirect. Those references are pointed at the
//! proxy, and local bundle scripts get `defer` so they run after the DOM the
//! injected base applies to.

use super::{
    Bundler, RewriteContext, RewriteStrategy, Substitution, rewrite_refs, root_relative_existing,
    strip_query,
};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static STATIC_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/static/(?:js|css|media)/").expect("valid regex"));

static ROOT_BUNDLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:(?:main|runtime|vendors?)[^/]*\.(?:js|css)|[^/]+\.chunk\.(?:js|css))$")
        .expect("valid regex")
});

static SCRIPT_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b([^>]*)>").expect("valid regex"));

static DEFER_OR_ASYNC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:defer|async)\b").expect("valid regex"));

static MODULE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\btype\s*=\s*["']?module"#).expect("valid regex"));

pub struct CraStrategy;

impl RewriteStrategy for CraStrategy {
    fn bundler(&self) -> Bundler {
        Bundler::Cra
    }

    fn rewrite(
        &self,
        html: &str,
        ctx: &RewriteContext<'_>,
        substitutions: &mut Vec<Substitution>,
    ) -> String {
        let html = rewrite_refs(html, |value| {
            if ctx.is_fixed(value) {
                return None;
            }
            let path = strip_query(value);
            let (to, rule) = if STATIC_REF.is_match(path) {
                (ctx.proxied(value), "cra-static")
            } else if ROOT_BUNDLE.is_match(path) {
                (ctx.proxied(value), "cra-root-bundle")
            } else {
                (root_relative_existing(value, ctx)?, "root-relative")
            };
            substitutions.push(Substitution::new(value, to.clone(), rule));
            Some(to)
        });

        add_defer(&html, &ctx.base_href, substitutions)
    }
}

/// Add `defer` to classic scripts loaded from under `base_href`.
fn add_defer(html: &str, base_href: &str, substitutions: &mut Vec<Substitution>) -> String {
    SCRIPT_OPEN
        .replace_all(html, |caps: &Captures<'_>| {
            let attrs = &caps[1];
            let local = attrs.contains(&format!("\"{base_href}"))
                || attrs.contains(&format!("'{base_href}"));
            if !local || DEFER_OR_ASYNC.is_match(attrs) || MODULE_TYPE.is_match(attrs) {
                return caps[0].to_string();
            }
            let (attrs, close) = match attrs.strip_suffix('/') {
                Some(trimmed) => (trimmed.trim_end(), " /"),
                None => (attrs.trim_end(), ""),
            };
            let tag = format!("<script{attrs} defer{close}>");
            substitutions.push(Substitution::new(&caps[0], tag.clone(), "defer"));
            tag
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::super::rewrite_entry;
    use super::*;

    const BASE: &str = "/sites/cra1/proxy/";

    fn files() -> Vec<String> {
        vec![
            "favicon.ico".to_string(),
            "index.html".to_string(),
            "static/css/main.xyz.css".to_string(),
            "static/js/main.abc.js".to_string(),
        ]
    }

    fn ctx(files: &[String]) -> RewriteContext<'_> {
        RewriteContext {
            base_href: BASE.to_string(),
            files,
        }
    }

    const INDEX: &str = r#"<!doctype html><html lang="en"><head><meta charset="utf-8"><link rel="icon" href="/favicon.ico"><script src="/static/js/main.abc.js"></script><link href="/static/css/main.xyz.css" rel="stylesheet"></head><body><div id="root"></div></body></html>"#;

    #[test]
    fn test_static_references_point_at_proxy() {
        let files = files();
        let out = rewrite_entry(INDEX, &ctx(&files));
        assert_eq!(out.bundler, Bundler::Cra);
        assert!(out.html.contains(r#"<base href="/sites/cra1/proxy/">"#));
        assert!(out.html.contains(r#"src="/sites/cra1/proxy/static/js/main.abc.js""#));
        assert!(out.html.contains(r#"href="/sites/cra1/proxy/static/css/main.xyz.css""#));
        assert!(out.html.contains(r#"href="/sites/cra1/proxy/favicon.ico""#));
        assert!(!out.html.contains(r#""/static/js/main.abc.js""#));
    }

    #[test]
    fn test_defer_added_once() {
        let files = files();
        let once = rewrite_entry(INDEX, &ctx(&files)).html;
        assert_eq!(once.matches(" defer").count(), 1);
        let twice = rewrite_entry(&once, &ctx(&files));
        assert_eq!(twice.html, once);
        assert!(twice.substitutions.is_empty());
    }

    #[test]
    fn test_root_bundles_rewritten_even_when_not_listed() {
        let files = files();
        let html = r#"<link href="/static/css/main.xyz.css"><script src="/main.7c1d.js"></script><script src="/2.chunk.js"></script>"#;
        let out = rewrite_entry(html, &ctx(&files));
        assert!(out.html.contains(r#"src="/sites/cra1/proxy/main.7c1d.js""#));
        assert!(out.html.contains(r#"src="/sites/cra1/proxy/2.chunk.js""#));
        assert!(
            out.substitutions
                .iter()
                .any(|s| s.rule == "cra-root-bundle")
        );
    }

    #[test]
    fn test_async_and_module_scripts_untouched() {
        let files = files();
        let html = r#"<script async src="/static/js/main.abc.js"></script><script type="module" src="/static/js/x.js"></script><script>inline()</script>"#;
        let out = rewrite_entry(html, &ctx(&files));
        assert!(!out.html.contains("defer"));
        assert!(out.html.contains("<script>inline()</script>"));
    }

    #[test]
    fn test_external_references_untouched() {
        let files = files();
        let html = r#"<script src="https://cdn.test/static/js/lib.js"></script><link href="/static/css/main.xyz.css">"#;
        let out = rewrite_entry(html, &ctx(&files));
        assert!(out.html.contains(r#"src="https://cdn.test/static/js/lib.js""#));
    }
}
