//! Content Walker. Returns only `path -> lastModifiedMillis`, the shape the
//! Merkle Builder and Catalog Store actually need, rather than reading file
//! bodies during the walk itself.

use crate::error::{Error, Result};
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const DEFAULT_IGNORE_FILE: &str = ".ctxdignore";

#[derive(Debug, Clone)]
pub struct WalkLimits {
    pub max_depth: usize,
    pub max_file_bytes: usize,
    pub respect_gitignore: bool,
    /// Name of the auxiliary workspace ignore file layered on top of VCS
    /// ignore rules; shares `.gitignore`'s pattern grammar.
    pub extra_ignore_file: String,
}

impl Default for WalkLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_file_bytes: 10 * 1024 * 1024,
            respect_gitignore: true,
            extra_ignore_file: DEFAULT_IGNORE_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WalkStats {
    pub file_count: usize,
    pub skipped_binary: usize,
    pub skipped_oversized: usize,
    pub skipped_symlink_escape: usize,
    pub skipped_unreadable: usize,
}

/// `path -> lastModifiedMillis`. Keys unique, order irrelevant.
pub type FileMap = BTreeMap<String, u64>;

/// Walks `root`, honoring layered ignore rules plus a binary/size/symlink
/// filter. Restartable: produces the same mapping for the same filesystem
/// state.
pub fn walk(root: &Path, limits: &WalkLimits) -> Result<(FileMap, WalkStats)> {
    let canonical_root = root.canonicalize().map_err(|source| Error::WalkIo {
        root: root.display().to_string(),
        source,
    })?;

    let mut files = FileMap::new();
    let mut stats = WalkStats::default();

    let mut builder = WalkBuilder::new(&canonical_root);
    builder
        .max_depth(Some(limits.max_depth))
        .hidden(true)
        .git_ignore(limits.respect_gitignore)
        .git_global(limits.respect_gitignore)
        .git_exclude(limits.respect_gitignore)
        .ignore(true)
        .add_custom_ignore_filename(&limits.extra_ignore_file)
        .follow_links(false)
        .same_file_system(true);

    let walker = builder.build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => {
                stats.skipped_unreadable += 1;
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if path_escapes_root(&canonical_root, path) {
            stats.skipped_symlink_escape += 1;
            continue;
        }

        let metadata = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(_) => {
                stats.skipped_unreadable += 1;
                continue;
            }
        };

        if metadata.file_type().is_symlink() {
            stats.skipped_symlink_escape += 1;
            continue;
        }

        if metadata.len() as usize > limits.max_file_bytes {
            stats.skipped_oversized += 1;
            tracing::warn!(path = %path.display(), "skipping oversized file");
            continue;
        }

        if looks_binary(path) {
            stats.skipped_binary += 1;
            continue;
        }

        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        files.insert(path.to_string_lossy().to_string(), mtime_ms);
        stats.file_count += 1;
    }

    Ok((files, stats))
}

fn path_escapes_root(root: &Path, path: &Path) -> bool {
    match path.canonicalize() {
        Ok(canonical) => !canonical.starts_with(root),
        Err(_) => true,
    }
}

/// Null-byte sample heuristic over the first 8KiB, same threshold used by
/// `ripgrep`/the `ignore` ecosystem for "looks like text" detection.
fn looks_binary(path: &Path) -> bool {
    use std::io::Read;
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; 8192];
    let Ok(n) = file.read(&mut buf) else {
        return false;
    };
    buf[..n].contains(&0)
}

pub fn to_absolute(root: &Path, rel_or_abs: &str) -> PathBuf {
    let p = Path::new(rel_or_abs);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_respects_binary_filter() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.txt"), "hello\nworld\n").unwrap();
        std::fs::write(temp.path().join("b.bin"), [0u8, 1, 2, 0, 3]).unwrap();

        let (files, stats) = walk(temp.path(), &WalkLimits::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(stats.skipped_binary, 1);
    }

    #[test]
    fn walk_respects_size_limit() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("big.txt"), "x".repeat(200)).unwrap();

        let limits = WalkLimits {
            max_file_bytes: 100,
            ..Default::default()
        };
        let (files, stats) = walk(temp.path(), &limits).unwrap();
        assert_eq!(files.len(), 0);
        assert_eq!(stats.skipped_oversized, 1);
    }

    #[test]
    fn walk_is_idempotent_for_unchanged_tree() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.txt"), "hello\n").unwrap();
        std::fs::write(temp.path().join("b.txt"), "world\n").unwrap();

        let (first, _) = walk(temp.path(), &WalkLimits::default()).unwrap();
        let (second, _) = walk(temp.path(), &WalkLimits::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn walk_fails_on_missing_root() {
        let result = walk(Path::new("/nonexistent/path/for/ctxd-tests"), &WalkLimits::default());
        assert!(matches!(result, Err(Error::WalkIo { .. })));
    }
}
