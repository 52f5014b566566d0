//! Directory scanner: the candidate CSV files of an import folder.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use csvault_core::models::SourceFile;

use crate::config::ImportConfig;

/// List `.csv` files (any case) under `root`, sorted by path.
///
/// Only the top level is scanned unless `import.recursive` is set. Paths
/// matching `import.exclude_globs` (relative to `root`) are skipped.
pub fn scan_folder(root: &Path, config: &ImportConfig) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        bail!("Import folder does not exist: {}", root.display());
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;

    let exclude_set = build_globset(&config.exclude_globs)?;
    let max_depth = if config.recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).max_depth(max_depth) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !has_csv_extension(path) {
            continue;
        }

        let relative = path.strip_prefix(&root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        let metadata = entry.metadata()?;
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        files.push(SourceFile {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified_at,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(files)
}

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
