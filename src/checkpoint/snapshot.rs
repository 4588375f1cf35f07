use super::{Checkpoint, TrackedPaths, is_plain_target};
use crate::errors::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Link,
}

/// Existence of one tracked target at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub target: String,
    pub existed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub round: u32,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

/// Round-keyed snapshots under a single root directory.
///
/// Layout: `<root>/round-<n>/manifest.json` plus `<root>/round-<n>/files/<target>`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    tracked: TrackedPaths,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>, tracked: TrackedPaths) -> Self {
        Self {
            root: root.into(),
            tracked,
        }
    }

    /// Store rooted at `<workspace>/.roundtable/checkpoints`.
    pub fn for_workspace(workspace: &Path, tracked: TrackedPaths) -> Self {
        Self::new(workspace.join(".roundtable").join("checkpoints"), tracked)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tracked(&self) -> &TrackedPaths {
        &self.tracked
    }

    pub fn round_dir(&self, round: u32) -> PathBuf {
        self.root.join(format!("round-{}", round))
    }

    /// Snapshot the tracked targets of `workspace` for `round`, replacing
    /// any earlier checkpoint for the same round.
    pub fn create(&self, round: u32, workspace: &Path) -> Result<Checkpoint, CheckpointError> {
        self.tracked.validate()?;
        let dir = self.round_dir(round);
        remove_path(&dir)?;
        let files_dir = dir.join(FILES_DIR);
        fs::create_dir_all(&files_dir).map_err(|e| CheckpointError::io(&files_dir, e))?;

        let mut entries = Vec::with_capacity(self.tracked.targets.len());
        for target in &self.tracked.targets {
            let live = workspace.join(target);
            let kind = match fs::symlink_metadata(&live) {
                Ok(meta) if meta.is_symlink() => Some(EntryKind::Link),
                Ok(meta) if meta.is_dir() => Some(EntryKind::Dir),
                Ok(_) => Some(EntryKind::File),
                Err(_) => None,
            };
            if let Some(kind) = kind {
                let dest = files_dir.join(target);
                match kind {
                    EntryKind::Dir => copy_dir(&live, &dest)?,
                    EntryKind::File => copy_file(&live, &dest)?,
                    EntryKind::Link => copy_link(&live, &dest)?,
                }
            }
            entries.push(ManifestEntry {
                target: target.clone(),
                existed: kind.is_some(),
                kind,
            });
        }

        let created_at = Utc::now();
        let manifest = Manifest {
            round,
            created_at,
            entries,
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
            CheckpointError::Manifest {
                path: manifest_path.clone(),
                source: e,
            }
        })?;
        fs::write(&manifest_path, json).map_err(|e| CheckpointError::io(&manifest_path, e))?;

        tracing::debug!(round, dir = %dir.display(), "Checkpoint created");

        Ok(Checkpoint {
            round,
            dir,
            created_at,
            restorable: true,
        })
    }

    pub fn load_manifest(&self, round: u32) -> Result<Manifest, CheckpointError> {
        let path = self.round_dir(round).join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound { round });
            }
            Err(e) => return Err(CheckpointError::io(&path, e)),
        };
        serde_json::from_str(&content).map_err(|e| CheckpointError::Manifest { path, source: e })
    }

    /// Reconcile `workspace` to the snapshot for `round`.
    ///
    /// Targets that existed are replaced by their snapshot copy; targets
    /// that did not exist are deleted if present now. Returns how many
    /// paths were touched.
    pub fn restore(&self, round: u32, workspace: &Path) -> Result<usize, CheckpointError> {
        let manifest = self.load_manifest(round)?;
        if let Some(entry) = manifest.entries.iter().find(|e| !is_plain_target(&e.target)) {
            return Err(CheckpointError::InvalidTarget {
                target: entry.target.clone(),
            });
        }
        let files_dir = self.round_dir(round).join(FILES_DIR);
        let mut touched = 0;

        for entry in &manifest.entries {
            let live = workspace.join(&entry.target);
            if entry.existed {
                remove_path(&live)?;
                let snapshot = files_dir.join(&entry.target);
                match entry.kind {
                    Some(EntryKind::Dir) => copy_dir(&snapshot, &live)?,
                    Some(EntryKind::Link) => copy_link(&snapshot, &live)?,
                    _ => copy_file(&snapshot, &live)?,
                }
                touched += 1;
            } else if fs::symlink_metadata(&live).is_ok() {
                remove_path(&live)?;
                touched += 1;
            }
        }

        tracing::info!(round, touched, "Checkpoint restored");
        Ok(touched)
    }

    /// All checkpoints under the root, ordered by round.
    pub fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(&self.root, e)),
        };

        let mut checkpoints: Vec<Checkpoint> = read_dir
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let round = name.strip_prefix("round-")?.parse::<u32>().ok()?;
                Some((round, e.path()))
            })
            .map(|(round, dir)| match self.load_manifest(round) {
                Ok(manifest) => Checkpoint {
                    round,
                    dir,
                    created_at: manifest.created_at,
                    restorable: true,
                },
                Err(_) => Checkpoint {
                    round,
                    dir,
                    created_at: DateTime::<Utc>::MIN_UTC,
                    restorable: false,
                },
            })
            .collect();

        checkpoints.sort_by_key(|c| c.round);
        Ok(checkpoints)
    }
}

fn remove_path(path: &Path) -> Result<(), CheckpointError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(_) => return Ok(()),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| CheckpointError::io(path, e))
}

fn copy_file(src: &Path, dest: &Path) -> Result<(), CheckpointError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
    }
    fs::copy(src, dest).map_err(|e| CheckpointError::io(src, e))?;
    Ok(())
}

fn copy_dir(src: &Path, dest: &Path) -> Result<(), CheckpointError> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            CheckpointError::io(path, std::io::Error::other(e.to_string()))
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| CheckpointError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target)?;
        } else if entry.file_type().is_symlink() {
            copy_link(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Recreate the link itself; the link target is never followed.
#[cfg(unix)]
fn copy_link(src: &Path, dest: &Path) -> Result<(), CheckpointError> {
    let link = fs::read_link(src).map_err(|e| CheckpointError::io(src, e))?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
    }
    std::os::unix::fs::symlink(&link, dest).map_err(|e| CheckpointError::io(dest, e))
}

#[cfg(not(unix))]
fn copy_link(src: &Path, _dest: &Path) -> Result<(), CheckpointError> {
    tracing::warn!(path = %src.display(), "Symlink not preserved in checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::collect_fingerprints;
    use tempfile::tempdir;

    fn tracked() -> TrackedPaths {
        TrackedPaths {
            targets: vec!["src".into(), "tests".into(), "package.json".into()],
            ..TrackedPaths::default()
        }
    }

    fn seed(ws: &Path) {
        fs::create_dir_all(ws.join("src/util")).unwrap();
        fs::write(ws.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(ws.join("src/util/mod.rs"), "pub mod x;").unwrap();
        fs::write(ws.join("package.json"), r#"{"name":"demo"}"#).unwrap();
    }

    #[test]
    fn test_create_writes_manifest_with_existence() {
        let ws = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        seed(ws.path());
        let store = CheckpointStore::new(store_dir.path(), tracked());

        let cp = store.create(1, ws.path()).unwrap();
        assert_eq!(cp.round, 1);
        assert!(cp.restorable);

        let manifest = store.load_manifest(1).unwrap();
        let by_target: Vec<(&str, bool, Option<EntryKind>)> = manifest
            .entries
            .iter()
            .map(|e| (e.target.as_str(), e.existed, e.kind))
            .collect();
        assert_eq!(
            by_target,
            vec![
                ("src", true, Some(EntryKind::Dir)),
                ("tests", false, None),
                ("package.json", true, Some(EntryKind::File)),
            ]
        );
        assert!(cp.dir.join("files/src/util/mod.rs").exists());
    }

    #[test]
    fn test_restore_round_trip_reconciles_existence() {
        let ws = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        seed(ws.path());
        let store = CheckpointStore::new(store_dir.path(), tracked());
        let before = collect_fingerprints(ws.path(), store.tracked());
        store.create(1, ws.path()).unwrap();

        // mutate: edit, delete, add a file, create a target that did not exist
        fs::write(ws.path().join("src/main.rs"), "fn main() { panic!() }").unwrap();
        fs::remove_file(ws.path().join("src/util/mod.rs")).unwrap();
        fs::write(ws.path().join("src/extra.rs"), "// new").unwrap();
        fs::create_dir_all(ws.path().join("tests")).unwrap();
        fs::write(ws.path().join("tests/it.rs"), "#[test] fn t() {}").unwrap();
        fs::remove_file(ws.path().join("package.json")).unwrap();

        let touched = store.restore(1, ws.path()).unwrap();
        assert_eq!(touched, 3);

        let after = collect_fingerprints(ws.path(), store.tracked());
        assert_eq!(after, before);
        assert!(!ws.path().join("tests").exists());
        assert!(!ws.path().join("src/extra.rs").exists());
    }

    #[test]
    fn test_restore_missing_round_is_not_found() {
        let store_dir = tempdir().unwrap();
        let ws = tempdir().unwrap();
        let store = CheckpointStore::new(store_dir.path(), tracked());
        let err = store.restore(7, ws.path()).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { round: 7 }));
    }

    #[test]
    fn test_recreate_replaces_previous_snapshot() {
        let ws = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        seed(ws.path());
        let store = CheckpointStore::new(store_dir.path(), tracked());
        store.create(2, ws.path()).unwrap();

        fs::remove_dir_all(ws.path().join("src/util")).unwrap();
        let cp = store.create(2, ws.path()).unwrap();

        assert!(!cp.dir.join("files/src/util").exists());
        assert!(cp.dir.join("files/src/main.rs").exists());
    }

    #[test]
    fn test_create_rejects_targets_outside_workspace() {
        let parent = tempdir().unwrap();
        let ws = parent.path().join("ws");
        fs::create_dir_all(&ws).unwrap();
        let victim = parent.path().join("victim.txt");
        fs::write(&victim, "keep me").unwrap();
        let store_dir = tempdir().unwrap();
        let store = CheckpointStore::new(
            store_dir.path(),
            TrackedPaths {
                targets: vec![victim.to_string_lossy().into_owned(), "../sibling".into()],
                ..TrackedPaths::default()
            },
        );

        let err = store.create(1, &ws).unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidTarget { .. }));
        assert_eq!(fs::read_to_string(&victim).unwrap(), "keep me");
        assert!(!store.round_dir(1).exists());

        let err = store.restore(1, &ws).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { round: 1 }));
        assert!(victim.exists());
        assert!(!parent.path().join("sibling").exists());
    }

    #[test]
    fn test_restore_refuses_manifest_entry_outside_workspace() {
        let parent = tempdir().unwrap();
        let ws = parent.path().join("ws");
        seed(&ws);
        let sibling = parent.path().join("sibling");
        fs::write(&sibling, "outside").unwrap();
        let store_dir = tempdir().unwrap();
        let store = CheckpointStore::new(store_dir.path(), tracked());
        store.create(1, &ws).unwrap();

        let mut manifest = store.load_manifest(1).unwrap();
        manifest.entries.push(ManifestEntry {
            target: "../sibling".into(),
            existed: false,
            kind: None,
        });
        fs::write(
            store.round_dir(1).join(MANIFEST_FILE),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();
        fs::write(ws.join("src/main.rs"), "edited").unwrap();

        let err = store.restore(1, &ws).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::InvalidTarget { ref target } if target == "../sibling"
        ));
        assert_eq!(fs::read_to_string(&sibling).unwrap(), "outside");
        // nothing was touched before the manifest was rejected
        assert_eq!(fs::read_to_string(ws.join("src/main.rs")).unwrap(), "edited");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_survive_snapshot_and_restore() {
        use std::os::unix::fs::symlink;

        let ws = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        seed(ws.path());
        symlink("main.rs", ws.path().join("src/current.rs")).unwrap();
        symlink("src/main.rs", ws.path().join("package.json.link")).unwrap();
        let store = CheckpointStore::new(
            store_dir.path(),
            TrackedPaths {
                targets: vec!["src".into(), "package.json.link".into()],
                ..TrackedPaths::default()
            },
        );
        store.create(1, ws.path()).unwrap();
        let manifest = store.load_manifest(1).unwrap();
        assert_eq!(manifest.entries[1].kind, Some(EntryKind::Link));

        fs::remove_file(ws.path().join("src/current.rs")).unwrap();
        fs::remove_file(ws.path().join("package.json.link")).unwrap();
        store.restore(1, ws.path()).unwrap();

        assert_eq!(
            fs::read_link(ws.path().join("src/current.rs")).unwrap(),
            Path::new("main.rs")
        );
        assert_eq!(
            fs::read_link(ws.path().join("package.json.link")).unwrap(),
            Path::new("src/main.rs")
        );
        assert_eq!(
            fs::read_to_string(ws.path().join("src/main.rs")).unwrap(),
            "fn main() {}"
        );
    }

    #[test]
    fn test_list_orders_by_round() {
        let ws = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        seed(ws.path());
        let store = CheckpointStore::new(store_dir.path(), tracked());
        for round in [3, 1, 2] {
            store.create(round, ws.path()).unwrap();
        }
        fs::create_dir_all(store.round_dir(9)).unwrap();

        let rounds: Vec<(u32, bool)> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|c| (c.round, c.restorable))
            .collect();
        assert_eq!(rounds, vec![(1, true), (2, true), (3, true), (9, false)]);
    }
}
