//! Typed error hierarchy for roundtable.
//!
//! One enum per subsystem:
//! - `StoreError`: run state store preconditions
//! - `CheckpointError`: snapshot and restore failures
//! - `TurnError`: a single agent turn (always caught by the task runner)
//! - `GateError`: pause/approval gate aborts
//! - `OrchestratorError`: anything escaping the round loop
//! - `ControlError`: rejected operations on the run control surface

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from the run state store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("No active run")]
    NoActiveRun,

    #[error("A run is already active ({run_id})")]
    AlreadyRunning { run_id: String },
}

/// Errors from the fingerprint/checkpoint subsystem.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("No checkpoint found for round {round}")]
    NotFound { round: u32 },

    #[error("Tracked target '{target}' must be a plain path relative to the workspace")]
    InvalidTarget { target: String },

    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid checkpoint manifest at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from executing one agent turn.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Failed to spawn agent process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent process exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Agent process timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Artifact I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while blocked in a gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("Run is no longer active (gate: {gate})")]
    RunNotActive { gate: String },
}

/// Errors escaping the round loop. These fail the whole run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Rejected operations on the run control surface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Cannot rewind while the run is active and not paused")]
    RewindWhileActive,

    #[error("No workspace is set; start a run first")]
    WorkspaceUnset,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_already_running_carries_run_id() {
        let err = StoreError::AlreadyRunning {
            run_id: "abc".to_string(),
        };
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn checkpoint_not_found_carries_round() {
        let err = CheckpointError::NotFound { round: 4 };
        match &err {
            CheckpointError::NotFound { round } => assert_eq!(*round, 4),
            _ => panic!("Expected NotFound"),
        }
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn turn_error_spawn_failed_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "agent not found");
        let err = TurnError::SpawnFailed {
            command: "codex".to_string(),
            source: io_err,
        };
        match &err {
            TurnError::SpawnFailed { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected SpawnFailed"),
        }
    }

    #[test]
    fn orchestrator_error_converts_from_gate_error() {
        let err: OrchestratorError = GateError::RunNotActive {
            gate: "round_start".into(),
        }
        .into();
        assert!(matches!(err, OrchestratorError::Gate(_)));
        assert!(err.to_string().contains("round_start"));
    }

    #[test]
    fn control_error_wraps_checkpoint_not_found() {
        let err: ControlError = CheckpointError::NotFound { round: 2 }.into();
        assert!(matches!(
            err,
            ControlError::Checkpoint(CheckpointError::NotFound { round: 2 })
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::NoActiveRun);
        assert_std_error(&CheckpointError::NotFound { round: 1 });
        assert_std_error(&TurnError::TimedOut(Duration::from_secs(1)));
        assert_std_error(&ControlError::WorkspaceUnset);
    }
}
