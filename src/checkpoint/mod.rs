//! Workspace fingerprints and round checkpoints.
//!
//! Fingerprints detect which tracked files an agent turn touched.
//! Checkpoints are full copies of the tracked targets keyed by round, and
//! restoring one reconciles the workspace back to the snapshot, including
//! deleting targets that did not exist when it was taken.

mod fingerprint;
mod snapshot;

pub use fingerprint::{
    Fingerprints, collect_fingerprints, diff_fingerprints, hash_bytes, normalize_relative,
};
pub use snapshot::{CheckpointStore, EntryKind, Manifest, ManifestEntry};

use crate::errors::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Metadata for one round's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub round: u32,
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub restorable: bool,
}

/// The fixed set of workspace paths that fingerprints and checkpoints cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPaths {
    /// Top-level files or directories, relative to the workspace.
    pub targets: Vec<String>,
    /// Directory names skipped at any depth while fingerprinting.
    pub ignored_dirs: Vec<String>,
}

pub const DEFAULT_TRACKED_TARGETS: &[&str] = &[
    "src",
    "tests",
    "lib",
    "app",
    "public",
    "package.json",
    "Cargo.toml",
    "README.md",
];

pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".next",
    "__pycache__",
    ".roundtable",
];

impl Default for TrackedPaths {
    fn default() -> Self {
        Self {
            targets: DEFAULT_TRACKED_TARGETS.iter().map(|s| s.to_string()).collect(),
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TrackedPaths {
    pub fn is_ignored_dir(&self, name: &OsStr) -> bool {
        self.ignored_dirs.iter().any(|d| OsStr::new(d) == name)
    }

    /// Reject any target that could resolve outside the workspace.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        match self.targets.iter().find(|t| !is_plain_target(t)) {
            Some(target) => Err(CheckpointError::InvalidTarget {
                target: target.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// True for a non-empty relative path made only of normal components.
pub fn is_plain_target(target: &str) -> bool {
    let path = Path::new(target);
    !target.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_targets() {
        for target in ["src", "package.json", "app/routes", ".github"] {
            assert!(is_plain_target(target), "{target}");
        }
        for target in ["", "/etc/passwd", "../sibling", "src/../..", "./src"] {
            assert!(!is_plain_target(target), "{target}");
        }
    }

    #[test]
    fn test_validate_names_first_bad_target() {
        let tracked = TrackedPaths {
            targets: vec!["src".into(), "../up".into(), "/abs".into()],
            ..TrackedPaths::default()
        };
        match tracked.validate() {
            Err(CheckpointError::InvalidTarget { target }) => assert_eq!(target, "../up"),
            other => panic!("Expected InvalidTarget, got {:?}", other),
        }
        assert!(TrackedPaths::default().validate().is_ok());
    }
}
