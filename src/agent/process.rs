use super::{AgentExecutor, Invocation};
use crate::errors::TurnError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Stderr kept in a `NonZeroExit` error.
const STDERR_TAIL_CHARS: usize = 2_000;

/// Runs the configured agent binary once per turn.
///
/// The prompt goes to stdin. The process may write the artifact itself
/// (its path is in `ROUNDTABLE_ARTIFACT`); otherwise captured stdout is
/// written there.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

#[async_trait]
impl AgentExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<(), TurnError> {
        let artifact = &invocation.artifact;
        if artifact.exists() {
            std::fs::remove_file(artifact).map_err(|e| TurnError::Io {
                path: artifact.clone(),
                source: e,
            })?;
        }

        tracing::debug!(
            role = %invocation.role,
            round = invocation.round,
            command = %self.display(),
            "Spawning agent process"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&invocation.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("ROUNDTABLE_ARTIFACT", artifact)
            .env("ROUNDTABLE_ROLE", invocation.role.as_str())
            .env("ROUNDTABLE_ROUND", invocation.round.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TurnError::SpawnFailed {
                command: self.display(),
                source: e,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // An agent that ignores stdin may exit before reading it.
            if let Err(e) = stdin.write_all(invocation.prompt.as_bytes()).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(TurnError::Io {
                    path: artifact.clone(),
                    source: e,
                });
            }
            drop(stdin);
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| TurnError::Io {
                path: artifact.clone(),
                source: e,
            })?,
            Err(_) => return Err(TurnError::TimedOut(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let skip = stderr.chars().count().saturating_sub(STDERR_TAIL_CHARS);
            return Err(TurnError::NonZeroExit {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: stderr.chars().skip(skip).collect(),
            });
        }

        if !artifact.exists() {
            std::fs::write(artifact, &output.stdout).map_err(|e| TurnError::Io {
                path: artifact.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
