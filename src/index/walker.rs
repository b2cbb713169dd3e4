//! Lazy enumeration of SQL source files under resolved source directories.

use crate::index::types::{CandidateDocument, IndexError, SourcePathEntry, WalkItem};
use crate::utils::app_data::AppConfig;
use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// File selection rules for a walk
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Lowercase extensions with a leading dot
    pub extensions: Vec<String>,
    /// Directory-name patterns to prune (case-insensitive)
    pub exclude_dirs: GlobSet,
    pub max_file_size: u64,
}

impl WalkOptions {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            extensions: config.normalized_extensions(),
            exclude_dirs: build_exclude_set(&config.exclude_dirs)?,
            max_file_size: config.max_file_size_bytes(),
        })
    }

    fn wants(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let dotted = format!(".{}", ext.to_lowercase());
                self.extensions.contains(&dotted)
            })
            .unwrap_or(false)
    }
}

fn build_exclude_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .with_context(|| format!("Invalid exclude pattern: {}", pattern))?;
        builder.add(glob);
    }
    builder.build().context("Failed to build exclude patterns")
}

/// Counters shared between a walk and whoever reports on it
#[derive(Debug, Default)]
pub struct WalkStats {
    scanned: AtomicU64,
    skipped: AtomicU64,
}

impl WalkStats {
    /// Files that passed the extension filter
    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::Relaxed)
    }

    /// Files left out for exceeding the size limit
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// A single pass over the existing entries; yields documents as files are read
pub struct DocumentWalk {
    roots: std::vec::IntoIter<PathBuf>,
    current: Option<ignore::Walk>,
    options: Arc<WalkOptions>,
    seen: HashSet<String>,
    stats: Arc<WalkStats>,
}

/// Start a fresh walk; entries with `exists == false` are skipped
pub fn walk(entries: &[SourcePathEntry], options: WalkOptions) -> DocumentWalk {
    let mut roots: Vec<PathBuf> = Vec::new();
    for entry in entries.iter().filter(|e| e.exists) {
        if let Some(resolved) = &entry.resolved {
            let root = PathBuf::from(resolved);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
    }

    DocumentWalk {
        roots: roots.into_iter(),
        current: None,
        options: Arc::new(options),
        seen: HashSet::new(),
        stats: Arc::new(WalkStats::default()),
    }
}

impl DocumentWalk {
    pub fn stats(&self) -> Arc<WalkStats> {
        Arc::clone(&self.stats)
    }

    fn open(&self, root: &Path) -> ignore::Walk {
        let exclude = Arc::clone(&self.options);
        WalkBuilder::new(root)
            .hidden(false)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                if !is_dir || entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !exclude.exclude_dirs.is_match(name.as_ref())
            })
            .build()
    }

    /// Turn one walked file into an item, or `None` when it is filtered out
    fn visit(&mut self, path: &Path) -> Option<WalkItem> {
        if !self.options.wants(path) {
            return None;
        }

        // Links are indexed under their own path but deduplicated by target
        let key = path.to_string_lossy().into_owned();
        let target = path
            .canonicalize()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| key.clone());
        if !self.seen.insert(target) {
            return None;
        }
        self.stats.scanned.fetch_add(1, Ordering::Relaxed);

        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => return Some(Err(IndexError::new(key, format!("cannot stat file: {}", e)))),
        };
        if size > self.options.max_file_size {
            log::debug!("skipping {} ({} bytes over limit)", key, size);
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Some(match fs::read(path) {
            Ok(bytes) => Ok(CandidateDocument {
                path: key,
                filename,
                content: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(e) => Err(IndexError::new(key, format!("cannot read file: {}", e))),
        })
    }
}

/// Regular files, plus symlinks whose target is a file or cannot be read.
/// Directory links are never followed.
fn is_file_or_file_link(entry: &ignore::DirEntry) -> bool {
    match entry.file_type() {
        Some(t) if t.is_file() => true,
        Some(t) if t.is_symlink() => fs::metadata(entry.path()).map_or(true, |m| m.is_file()),
        _ => false,
    }
}

impl Iterator for DocumentWalk {
    type Item = WalkItem;

    fn next(&mut self) -> Option<WalkItem> {
        loop {
            if self.current.is_none() {
                let root = self.roots.next()?;
                log::debug!("walking {}", root.display());
                self.current = Some(self.open(&root));
            }

            let entry = match self.current.as_mut().and_then(Iterator::next) {
                Some(entry) => entry,
                None => {
                    self.current = None;
                    continue;
                }
            };

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("walk error: {}", e);
                    continue;
                }
            };

            if !is_file_or_file_link(&entry) {
                continue;
            }

            if let Some(item) = self.visit(entry.path()) {
                return Some(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::paths::PathResolver;
    use tempfile::TempDir;

    fn options() -> WalkOptions {
        WalkOptions::from_config(&AppConfig::default()).unwrap()
    }

    fn write(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn docs(items: Vec<WalkItem>) -> Vec<CandidateDocument> {
        items.into_iter().map(|i| i.unwrap()).collect()
    }

    #[test]
    fn test_walks_sql_files_recursively() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.sql", b"select 1");
        write(dir.path(), "nested/deeper/b.SQL", b"select 2");
        write(dir.path(), "notes.txt", b"not sql");
        write(dir.path(), ".hidden/c.sql", b"select 3");

        let entries = PathResolver::new(dir.path()).resolve(&["."]);
        let found = docs(walk(&entries, options()).collect());

        let names: Vec<&str> = found.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(names, vec!["c.sql", "a.sql", "b.SQL"]);
        assert!(found.iter().all(|d| Path::new(&d.path).is_absolute()));
        assert_eq!(found[1].content, "select 1");
    }

    #[test]
    fn test_excluded_directories_pruned() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "keep/a.sql", b"select 1");
        write(dir.path(), "node_modules/pkg/b.sql", b"select 2");
        write(dir.path(), "Node_Modules/c.sql", b"select 3");
        write(dir.path(), ".git/d.sql", b"select 4");

        let entries = PathResolver::new(dir.path()).resolve(&["."]);
        let found = docs(walk(&entries, options()).collect());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "a.sql");
    }

    #[test]
    fn test_missing_entries_skipped_and_overlaps_deduplicated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "sql/a.sql", b"select 1");
        write(dir.path(), "sql/sub/b.sql", b"select 2");

        let entries = PathResolver::new(dir.path()).resolve(&["sql", "sql/sub", "missing"]);
        assert!(!entries[2].exists);

        let walk = walk(&entries, options());
        let stats = walk.stats();
        let found = docs(walk.collect());
        assert_eq!(found.len(), 2);
        assert_eq!(stats.scanned(), 2);
    }

    #[test]
    fn test_large_files_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "small.sql", b"select 1");
        write(dir.path(), "big.sql", &vec![b'x'; 2048]);

        let entries = PathResolver::new(dir.path()).resolve(&["."]);
        let mut opts = options();
        opts.max_file_size = 1024;
        let walk = walk(&entries, opts);
        let stats = walk.stats();
        let found = docs(walk.collect());

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "small.sql");
        assert_eq!(stats.scanned(), 2);
        assert_eq!(stats.skipped(), 1);
    }

    #[test]
    fn test_invalid_utf8_decoded_lossily() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "latin1.sql", b"select '\xe9t\xe9'");

        let entries = PathResolver::new(dir.path()).resolve(&["."]);
        let found = docs(walk(&entries, options()).collect());
        assert_eq!(found[0].content, "select '\u{FFFD}t\u{FFFD}'");
    }

    #[test]
    fn test_walk_is_restartable() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.sql", b"select 1");
        let entries = PathResolver::new(dir.path()).resolve(&["."]);

        assert_eq!(walk(&entries, options()).count(), 1);
        write(dir.path(), "b.sql", b"select 2");
        assert_eq!(walk(&entries, options()).count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_files_indexed() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().unwrap();
        write(outside.path(), "shared.sql", b"select shared");
        write(outside.path(), "linked_dir/c.sql", b"select 3");

        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.sql", b"select 1");
        symlink(outside.path().join("shared.sql"), dir.path().join("link.sql")).unwrap();
        symlink(outside.path().join("linked_dir"), dir.path().join("linked_dir")).unwrap();

        let entries = PathResolver::new(dir.path()).resolve(&["."]);
        let walk = walk(&entries, options());
        let stats = walk.stats();
        let found = docs(walk.collect());

        let names: Vec<&str> = found.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(names, vec!["a.sql", "link.sql"]);
        assert_eq!(found[1].content, "select shared");
        assert!(found[1].path.ends_with("link.sql"));
        assert_eq!(stats.scanned(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_reported() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        symlink(dir.path().join("gone.sql"), dir.path().join("broken.sql")).unwrap();

        let entries = PathResolver::new(dir.path()).resolve(&["."]);
        let items: Vec<WalkItem> = walk(&entries, options()).collect();
        assert_eq!(items.len(), 1);
        let err = items.into_iter().next().unwrap().unwrap_err();
        assert!(err.path.ends_with("broken.sql"));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let config = AppConfig {
            exclude_dirs: vec!["[unclosed".to_string()],
            ..AppConfig::default()
        };
        assert!(WalkOptions::from_config(&config).is_err());
    }
}
