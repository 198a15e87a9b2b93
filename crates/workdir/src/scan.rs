//! Live filesystem scanning

use crate::ignore::{IgnoreRules, META_DIR};
use cairn_core::hash::hash_file_sized;
use cairn_core::{Entry, Error, Result, Tree};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Regular files found under a workdir root
#[derive(Debug, Default)]
pub struct LiveTree {
    /// Hashed files, keyed by workdir-relative path
    pub tree: Tree,
    /// Files matched by an ignore rule (never hashed)
    pub ignored: BTreeSet<String>,
}

/// Walk `root` and hash every regular file that is not ignored
///
/// The metadata directory is pruned entirely. Symlinks and other special
/// files are skipped.
pub fn scan(root: &Path, rules: &IgnoreRules) -> Result<LiveTree> {
    let mut live = LiveTree::default();
    if !root.is_dir() {
        return Ok(live);
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == META_DIR));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            tracing::warn!(path = %entry.path().display(), "skipping non-regular file");
            continue;
        }

        let rel = relative_path(root, entry.path())?;
        if rules.is_ignored(&rel) {
            live.ignored.insert(rel);
            continue;
        }

        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        let digest = hash_file_sized(entry.path(), metadata.len())?;
        let file = Entry::file(digest, metadata.len())
            .with_mode(file_mode(&metadata))
            .with_mtime(mtime_ms(&metadata));
        live.tree.insert(rel, file);
    }

    Ok(live)
}

/// Workdir-relative, forward-slash form of `path`
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| Error::user(format!("{} is outside {}", path.display(), root.display())))?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => {
                    return Err(Error::user(format!(
                        "file name is not valid UTF-8: {}",
                        path.display()
                    )))
                }
            },
            Component::CurDir => {}
            _ => return Err(Error::user(format!("unexpected path component in {}", path.display()))),
        }
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
pub(crate) fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub(crate) fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

fn mtime_ms(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::hash::hash_bytes;

    #[test]
    fn test_scan_hashes_files() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("sub/deeper"))?;
        fs::write(root.join("top.txt"), b"top")?;
        fs::write(root.join("sub/deeper/leaf.txt"), b"leaf")?;
        fs::write(root.join("empty.txt"), b"")?;

        let live = scan(root, &IgnoreRules::new())?;
        let paths: Vec<_> = live.tree.paths().collect();
        assert_eq!(paths, vec!["empty.txt", "sub/deeper/leaf.txt", "top.txt"]);
        assert_eq!(live.tree.get("top.txt").unwrap().digest, hash_bytes(b"top"));
        assert_eq!(live.tree.get("empty.txt").unwrap().size, 0);
        assert!(live.ignored.is_empty());
        Ok(())
    }

    #[test]
    fn test_meta_dir_pruned() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".meta"))?;
        fs::write(root.join(".meta/info"), b"{}")?;
        fs::write(root.join("file.txt"), b"x")?;

        let live = scan(root, &IgnoreRules::new())?;
        assert_eq!(live.tree.len(), 1);
        assert!(live.ignored.is_empty());
        Ok(())
    }

    #[test]
    fn test_ignored_files_not_hashed() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::write(root.join("keep.txt"), b"k")?;
        fs::write(root.join("scratch.tmp"), b"t")?;

        let live = scan(root, &IgnoreRules::new().with("*.tmp"))?;
        assert!(live.tree.contains("keep.txt"));
        assert!(!live.tree.contains("scratch.tmp"));
        assert!(live.ignored.contains("scratch.tmp"));
        Ok(())
    }

    #[test]
    fn test_missing_root_is_empty() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let live = scan(&temp_dir.path().join("nope"), &IgnoreRules::new())?;
        assert!(live.tree.is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_recorded() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("run.sh");
        fs::write(&path, b"#!/bin/sh\n")?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;

        let live = scan(temp_dir.path(), &IgnoreRules::new())?;
        assert_eq!(live.tree.get("run.sh").unwrap().mode, 0o755);
        Ok(())
    }

    #[test]
    fn test_relative_path_unicode() -> anyhow::Result<()> {
        let root = Path::new("/work");
        let rel = relative_path(root, &root.join("dir").join("Tjosan_räk smörgås.txt"))?;
        assert_eq!(rel, "dir/Tjosan_räk smörgås.txt");
        Ok(())
    }
}
