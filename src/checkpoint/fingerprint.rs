use super::{TrackedPaths, is_plain_target};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path};
use walkdir::WalkDir;

/// Relative path (always `/`-separated) → lowercase hex SHA-256.
pub type Fingerprints = BTreeMap<String, String>;

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Join path components with `/` regardless of platform.
pub fn normalize_relative(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Hash every file under the tracked targets of `workspace`.
///
/// Missing targets, targets outside the workspace and unreadable files
/// are skipped.
pub fn collect_fingerprints(workspace: &Path, tracked: &TrackedPaths) -> Fingerprints {
    let mut fingerprints = Fingerprints::new();

    for target in &tracked.targets {
        if !is_plain_target(target) {
            tracing::warn!(target = %target, "Skipping tracked target outside the workspace");
            continue;
        }
        let root = workspace.join(target);
        if fs::symlink_metadata(&root).is_err() {
            continue;
        }

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir() && tracked.is_ignored_dir(entry.file_name()))
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(workspace) else {
                continue;
            };
            match fs::read(entry.path()) {
                Ok(bytes) => {
                    fingerprints.insert(normalize_relative(relative), hash_bytes(&bytes));
                }
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), "Skipping unreadable file: {}", e);
                }
            }
        }
    }

    fingerprints
}

/// Sorted paths that were added, removed, or whose hash changed.
pub fn diff_fingerprints(before: &Fingerprints, after: &Fingerprints) -> Vec<String> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tracked(targets: &[&str]) -> TrackedPaths {
        TrackedPaths {
            targets: targets.iter().map(|s| s.to_string()).collect(),
            ..TrackedPaths::default()
        }
    }

    #[test]
    fn test_hash_bytes_is_sha256_hex() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_collect_walks_targets_and_skips_noise() {
        let dir = tempdir().unwrap();
        let ws = dir.path();
        fs::create_dir_all(ws.join("src/nested")).unwrap();
        fs::create_dir_all(ws.join("src/node_modules/pkg")).unwrap();
        fs::write(ws.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(ws.join("src/nested/lib.rs"), "pub fn x() {}").unwrap();
        fs::write(ws.join("src/node_modules/pkg/index.js"), "noise").unwrap();
        fs::write(ws.join("package.json"), "{}").unwrap();
        fs::write(ws.join("untracked.txt"), "ignored").unwrap();

        let fps = collect_fingerprints(ws, &tracked(&["src", "package.json", "tests"]));
        let keys: Vec<&str> = fps.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["package.json", "src/main.rs", "src/nested/lib.rs"]);
        assert_eq!(fps["package.json"], hash_bytes(b"{}"));
    }

    #[test]
    fn test_collect_ignores_targets_outside_workspace() {
        let parent = tempdir().unwrap();
        let ws = parent.path().join("ws");
        fs::create_dir_all(ws.join("src")).unwrap();
        fs::write(ws.join("src/lib.rs"), "").unwrap();
        fs::create_dir_all(parent.path().join("sibling")).unwrap();
        fs::write(parent.path().join("sibling/secret.txt"), "x").unwrap();
        let absolute = parent.path().join("sibling").to_string_lossy().into_owned();

        let fps = collect_fingerprints(&ws, &tracked(&["src", "../sibling", &absolute]));
        let keys: Vec<&str> = fps.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["src/lib.rs"]);
    }

    #[test]
    fn test_diff_reports_added_removed_and_changed() {
        let before: Fingerprints = [
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ]
        .into();
        let after: Fingerprints = [
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "20".to_string()),
            ("d".to_string(), "4".to_string()),
        ]
        .into();

        assert_eq!(diff_fingerprints(&before, &after), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_diff_is_symmetric_and_ignores_equal_entries() {
        let mut before = Fingerprints::new();
        let mut after = Fingerprints::new();
        // different insertion orders
        for (k, v) in [("z", "1"), ("m", "2"), ("a", "3")] {
            before.insert(k.into(), v.into());
        }
        for (k, v) in [("a", "3"), ("q", "9"), ("z", "5"), ("m", "2")] {
            after.insert(k.into(), v.into());
        }
        let forward = diff_fingerprints(&before, &after);
        let backward = diff_fingerprints(&after, &before);
        assert_eq!(forward, backward);
        assert_eq!(forward, vec!["q", "z"]);
    }
}
