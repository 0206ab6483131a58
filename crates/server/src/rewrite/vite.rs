//! Vite entry documents.
//!
//! Vite emits hashed `assets/name-HASH.ext` files. When the markup and the
//! stored bundle disagree about names (rebuilt assets, renamed uploads),
//! scripts and stylesheets are pointed at the first stored file with the
//! same extension, and images and fonts at the stored file whose name
//! matches once the hash is stripped. Replaced images also get a CSS
//! background override keyed by their hashless name.
//!
//! First-by-extension is only right for single-bundle builds; code-split
//! output with several entry chunks is not disambiguated.

use super::{
    Bundler, RewriteContext, RewriteStrategy, Substitution, insert_before_head_close,
    rewrite_refs, split_content_hash, strip_query,
};
use quay_core::path::{basename, extension};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Marker attribute on the injected override block.
pub const OVERRIDES_MARKER: &str = "data-quay-asset-overrides";

const BUNDLE_EXTENSIONS: &[&str] = &["js", "mjs", "css"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico"];
const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(["']?)([^"')]+)(["']?)\s*\)"#).expect("valid regex")
});

pub struct ViteStrategy;

impl RewriteStrategy for ViteStrategy {
    fn bundler(&self) -> Bundler {
        Bundler::Vite
    }

    fn rewrite(
        &self,
        html: &str,
        ctx: &RewriteContext<'_>,
        substitutions: &mut Vec<Substitution>,
    ) -> String {
        let mut overrides = Vec::new();

        let html = rewrite_refs(html, |value| {
            let (to, rule) = match_reference(value, ctx, &mut overrides)?;
            substitutions.push(Substitution::new(value, to.clone(), rule));
            Some(to)
        });

        // Inline styles may reference hashed images through url(...)
        let html = CSS_URL
            .replace_all(&html, |caps: &Captures<'_>| {
                let value = &caps[2];
                match match_reference(value, ctx, &mut overrides) {
                    Some((to, rule)) => {
                        substitutions.push(Substitution::new(value, to.clone(), rule));
                        format!("url({}{to}{})", &caps[1], &caps[3])
                    }
                    None => caps[0].to_string(),
                }
            })
            .into_owned();

        if overrides.is_empty() || html.contains(OVERRIDES_MARKER) {
            return html;
        }
        let rules: String = overrides
            .iter()
            .map(|(class, url)| {
                format!(r#".{class},#{class}{{background-image:url("{url}")}}"#)
            })
            .collect();
        let block = format!("<style {OVERRIDES_MARKER}>{rules}</style>");
        substitutions.push(Substitution::new("", block.clone(), "vite-style-overrides"));
        insert_before_head_close(&html, &block)
    }
}

/// Decide a replacement for one reference, recording image overrides.
fn match_reference(
    value: &str,
    ctx: &RewriteContext<'_>,
    overrides: &mut Vec<(String, String)>,
) -> Option<(String, &'static str)> {
    if ctx.is_fixed(value) {
        return None;
    }
    let path = strip_query(value);
    let relative = path.trim_start_matches("./").trim_start_matches('/');
    let ext = extension(relative)?;

    if ctx.has_file(relative) {
        // Present as written; only root-relative needs the proxy prefix
        return value
            .starts_with('/')
            .then(|| (ctx.proxied(value), "root-relative"));
    }

    if BUNDLE_EXTENSIONS.contains(&ext.as_str()) {
        return match first_by_extension(ctx.files, &ext) {
            Some(found) => {
                tracing::warn!(
                    reference = %value,
                    replacement = %found,
                    "Bundle reference missing, substituting first stored file by extension"
                );
                Some((ctx.proxied(found), "vite-first-by-extension"))
            }
            None => {
                tracing::warn!(reference = %value, "No stored bundle with a matching extension");
                None
            }
        };
    }

    let is_image = IMAGE_EXTENSIONS.contains(&ext.as_str());
    if is_image || FONT_EXTENSIONS.contains(&ext.as_str()) {
        let wanted = hashless_name(relative);
        let Some(found) = ctx
            .files
            .iter()
            .find(|f| extension(f).as_deref() == Some(ext.as_str()) && hashless_name(f) == wanted)
        else {
            tracing::warn!(reference = %value, "No stored asset matches once the hash is stripped");
            return None;
        };
        let url = ctx.proxied(found);
        if is_image
            && let Some(class) = css_ident(&wanted)
            && !overrides.iter().any(|(c, _)| *c == class)
        {
            overrides.push((class, url.clone()));
        }
        return Some((url, "vite-hashless-asset"));
    }

    None
}

/// First stored file with `ext`, preferring the `assets/` directory.
fn first_by_extension<'a>(files: &'a [String], ext: &str) -> Option<&'a String> {
    let matching: Vec<&String> = files
        .iter()
        .filter(|f| extension(f).as_deref() == Some(ext))
        .collect();
    matching
        .iter()
        .find(|f| f.starts_with("assets/"))
        .or_else(|| matching.first())
        .copied()
}

/// File name with any content hash removed.
fn hashless_name(path: &str) -> String {
    split_content_hash(path)
        .map(|(name, _)| name)
        .unwrap_or_else(|| basename(path).to_string())
}

/// CSS identifier from a file name's stem, when it is a valid one.
fn css_ident(file_name: &str) -> Option<String> {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(s, _)| s);
    let first = stem.chars().next()?;
    let valid = (first.is_ascii_alphabetic() || first == '_')
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| stem.to_string())
}
