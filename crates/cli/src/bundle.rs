//! Walking a built site directory and splitting it into upload chunks.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A file in the bundle, relative to the bundle root with `/` separators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleFile {
    pub relative: String,
    pub path: PathBuf,
    pub size: u64,
}

/// List every regular file under `root`, sorted by relative path.
///
/// Hidden files and directories (leading `.`) are skipped; symlinks are
/// not followed.
pub fn collect_files(root: &Path) -> Result<Vec<BundleFile>> {
    let meta = std::fs::metadata(root)
        .with_context(|| format!("cannot read bundle directory {}", root.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?
            .len();
        files.push(BundleFile {
            relative: relative_path(root, entry.path())?,
            path: entry.into_path(),
            size,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside the bundle", path.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Group files into chunks of at most `max_files` files and, where possible,
/// `max_bytes` bytes. A single file larger than `max_bytes` gets a chunk of
/// its own.
pub fn plan_chunks(files: &[BundleFile], max_files: usize, max_bytes: u64) -> Vec<Vec<BundleFile>> {
    let max_files = max_files.max(1);
    let mut chunks: Vec<Vec<BundleFile>> = Vec::new();
    let mut current: Vec<BundleFile> = Vec::new();
    let mut current_bytes = 0u64;

    for file in files {
        let over_bytes = !current.is_empty() && current_bytes + file.size > max_bytes;
        if current.len() >= max_files || over_bytes {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += file.size;
        current.push(file.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
