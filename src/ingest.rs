//! Descriptor ingestion.
//!
//! Walks a directory for `*.chunks.json` descriptors (see
//! [`Document`]) and upserts each one into the store. Every file is its own
//! unit: a descriptor that fails to read, parse or validate is reported
//! and skipped without touching the store, and the scan moves on. A storage
//! failure ends the scan.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::cancel::CancellationToken;
use crate::error::{RagError, Result};
use crate::models::Document;
use crate::store::ChunkStore;

pub const DEFAULT_GLOB: &str = "*.chunks.json";

#[derive(Debug)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub error: RagError,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub files: usize,
    pub documents: usize,
    pub chunks_changed: u64,
    pub failures: Vec<ScanFailure>,
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| RagError::invalid(format!("bad glob '{}': {}", pattern, e)))?,
        );
    }
    builder
        .build()
        .map_err(|e| RagError::invalid(format!("bad glob set: {}", e)))
}

/// Descriptor files under `root` matching `pattern`, sorted by path.
///
/// `root` may also name a single file, which is returned as-is.
pub fn find_descriptors(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(RagError::not_found(format!(
            "scan root {} does not exist",
            root.display()
        )));
    }

    let include = build_globset(&[pattern])?;
    let exclude = build_globset(&["**/.git/**"])?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude.is_match(relative) {
            continue;
        }
        let name_matches = path
            .file_name()
            .map(|name| include.is_match(Path::new(name)))
            .unwrap_or(false);
        if name_matches || include.is_match(relative) {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Parses one descriptor file. Nothing is written.
pub fn read_descriptor(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path)
        .map_err(|e| RagError::invalid(format!("cannot read {}: {}", path.display(), e)))?;
    Document::from_json(&bytes)
}

/// Parses and upserts one descriptor; returns the chunk rows changed.
pub async fn ingest_file(store: &dyn ChunkStore, path: &Path) -> Result<u64> {
    let doc = read_descriptor(path)?;
    store.upsert_document_chunks(&doc).await
}

/// Ingests every descriptor under `root` that matches `pattern`.
pub async fn scan(
    store: &dyn ChunkStore,
    root: &Path,
    pattern: &str,
    cancel: &CancellationToken,
) -> Result<ScanReport> {
    let paths = find_descriptors(root, pattern)?;
    let mut report = ScanReport {
        files: paths.len(),
        ..Default::default()
    };
    tracing::info!(root = %root.display(), files = paths.len(), "scanning descriptors");

    for path in paths {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        match ingest_file(store, &path).await {
            Ok(changed) => {
                tracing::debug!(path = %path.display(), changed, "descriptor ingested");
                report.documents += 1;
                report.chunks_changed += changed;
            }
            // Unreadable or invalid descriptor: skip the file.
            Err(error @ RagError::InvalidArgument(_)) => {
                tracing::warn!(path = %path.display(), %error, "skipping descriptor");
                report.failures.push(ScanFailure { path, error });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}
