//! Agent turn execution.
//!
//! An [`AgentExecutor`] turns a prompt into exactly one text artifact. The
//! [`AgentTaskRunner`] wraps an executor with gating, state updates, events
//! and messages so the orchestrator only sees a [`TurnOutcome`].

pub mod augment;
mod demo;
mod process;
pub mod prompts;
mod runner;

pub use demo::{DemoExecutor, canned_output};
pub use process::ProcessExecutor;
pub use runner::{AgentTaskRunner, TurnOutcome, TurnRequest};

use crate::errors::TurnError;
use crate::state::{EnsembleVariant, Role};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Everything an executor needs for one turn.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub role: Role,
    pub round: u32,
    /// Set for coordinator ensemble members.
    pub variant: Option<EnsembleVariant>,
    pub prompt: String,
    /// File the turn must leave its output in.
    pub artifact: PathBuf,
    pub workspace: PathBuf,
}

/// Abstraction over how an agent produces output, for testability.
/// Real implementation: `ProcessExecutor`. Simulated: `DemoExecutor`.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run the turn. On success the artifact file exists.
    async fn execute(&self, invocation: &Invocation) -> Result<(), TurnError>;
}

/// `<run dir>/round-<n>/<role>[-<variant>].md`
pub fn artifact_path(
    run_dir: &Path,
    round: u32,
    role: Role,
    variant: Option<EnsembleVariant>,
) -> PathBuf {
    let name = match variant {
        Some(v) => format!("{}-{}.md", role, v.as_str()),
        None => format!("{}.md", role),
    };
    run_dir.join(format!("round-{}", round)).join(name)
}
