use crate::state::{LintResult, LintStatus};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

pub const NPM_LINT_COMMAND: &str = "npm run lint --silent";
const OUTPUT_TAIL_LINES: usize = 20;
const OUTPUT_TAIL_CHARS: usize = 2_000;

/// Resolves and runs the workspace lint command.
#[derive(Debug, Clone)]
pub struct LintRunner {
    command: Option<String>,
    timeout: Duration,
}

impl LintRunner {
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
            timeout,
        }
    }

    /// The configured override, else `npm run lint` when `package.json`
    /// defines `scripts.lint`.
    pub fn resolve(&self, workspace: &Path) -> Option<String> {
        if let Some(command) = &self.command {
            return Some(command.clone());
        }
        let content = std::fs::read_to_string(workspace.join("package.json")).ok()?;
        let manifest: serde_json::Value = serde_json::from_str(&content).ok()?;
        let script = manifest.get("scripts")?.get("lint")?.as_str()?;
        (!script.trim().is_empty()).then(|| NPM_LINT_COMMAND.to_string())
    }

    pub async fn run(&self, round: u32, workspace: &Path) -> LintResult {
        let Some(command) = self.resolve(workspace) else {
            return LintResult::skipped(round, "no lint command configured");
        };

        tracing::debug!(round, command = %command, "Running lint");
        let started = Instant::now();
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return failed(round, &command, format!("failed to spawn: {}", e), started);
            }
        };

        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let status = if output.status.success() {
                    LintStatus::Passed
                } else {
                    LintStatus::Failed
                };
                LintResult {
                    round,
                    status,
                    command: Some(command),
                    exit_code: output.status.code(),
                    output_excerpt: output_tail(&combined),
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Ok(Err(e)) => failed(round, &command, format!("failed to wait: {}", e), started),
            Err(_) => failed(
                round,
                &command,
                format!("timed out after {:?}", self.timeout),
                started,
            ),
        }
    }
}

fn failed(
    round: u32,
    command: &str,
    detail: String,
    started: Instant,
) -> LintResult {
    LintResult {
        round,
        status: LintStatus::Failed,
        command: Some(command.to_string()),
        exit_code: None,
        output_excerpt: detail,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Last lines of lint output, capped in characters.
fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    let tail = lines[start..].join("\n");
    let skip = tail.chars().count().saturating_sub(OUTPUT_TAIL_CHARS);
    tail.chars().skip(skip).collect()
}
