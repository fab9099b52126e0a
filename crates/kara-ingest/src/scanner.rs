//! Partition scanner.
//!
//! Walks `raw_root/<partition_key>/<source_id>/<file>` and yields every
//! record and media file it finds. Partitions and sources are discovered
//! from the directory tree; nothing about their number is assumed.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use kara_core::config::LakeConfig;

use crate::error::ScanError;

/// Depth of leaf files below the root: partition / source / file.
const FILE_DEPTH: usize = 3;
const SOURCE_DEPTH: usize = 2;

/// What a leaf file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Record,
    Media,
}

/// One leaf file of the lake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub partition_key: String,
    pub source_id: String,
    pub path: PathBuf,
    pub kind: FileKind,
}

/// Side-effect-free walker over the raw data lake.
#[derive(Debug, Clone)]
pub struct PartitionScanner {
    root: PathBuf,
    /// Empty means every source found on disk.
    sources: BTreeSet<String>,
    record_extensions: Vec<String>,
    media_extensions: Vec<String>,
}

impl PartitionScanner {
    /// Scanner over `root` with the default record (`json`) and media
    /// extensions.
    pub fn new(root: impl Into<PathBuf>, sources: impl IntoIterator<Item = String>) -> Self {
        let defaults = LakeConfig::default();
        Self {
            root: root.into(),
            sources: sources.into_iter().collect(),
            record_extensions: defaults.record_extensions,
            media_extensions: defaults.media_extensions,
        }
    }

    pub fn from_config(config: &LakeConfig) -> Self {
        Self {
            root: config.raw_root.clone(),
            sources: config.sources.iter().cloned().collect(),
            record_extensions: lowercase(&config.record_extensions),
            media_extensions: lowercase(&config.media_extensions),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the lake in file-name order.
    ///
    /// Fails only if the root itself is unreadable. Unreadable entries below
    /// it are logged and skipped. Calling `scan` again re-reads the tree.
    pub fn scan(&self) -> Result<impl Iterator<Item = ScannedFile> + '_, ScanError> {
        std::fs::read_dir(&self.root).map_err(|source| ScanError::IoAccess {
            path: self.root.clone(),
            source,
        })?;

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(FILE_DEPTH)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| self.should_descend(e));

        Ok(walker.filter_map(move |entry| match entry {
            Ok(entry) => self.classify(&entry),
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Skipping unreadable lake entry");
                None
            }
        }))
    }

    fn should_descend(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        if entry.depth() == SOURCE_DEPTH
            && entry.file_type().is_dir()
            && !self.sources.is_empty()
            && !self.sources.contains(&*name)
        {
            debug!(source = %name, "Source not selected, pruning");
            return false;
        }
        true
    }

    fn classify(&self, entry: &DirEntry) -> Option<ScannedFile> {
        if entry.depth() != FILE_DEPTH || !entry.file_type().is_file() {
            return None;
        }

        let path = entry.path();
        let source_dir = path.parent()?;
        let partition_dir = source_dir.parent()?;
        let source_id = source_dir.file_name()?.to_string_lossy().to_string();
        let partition_key = partition_dir.file_name()?.to_string_lossy().to_string();

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let kind = if self.record_extensions.contains(&ext) {
            FileKind::Record
        } else if self.media_extensions.contains(&ext) {
            FileKind::Media
        } else {
            debug!(file = %path.display(), "Ignoring file with unknown extension");
            return None;
        };

        Some(ScannedFile {
            partition_key,
            source_id,
            path: path.to_path_buf(),
            kind,
        })
    }
}

fn lowercase(exts: &[String]) -> Vec<String> {
    exts.iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect()
}
