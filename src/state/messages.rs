use super::AgentMessage;
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSON-lines log of agent messages, one file per round.
///
/// Layout: `<run dir>/round-<n>/messages.jsonl`
#[derive(Debug, Clone)]
pub struct MessageLog {
    run_dir: PathBuf,
}

impl MessageLog {
    pub fn new(run_dir: &Path) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
        }
    }

    pub fn round_file(&self, round: u32) -> PathBuf {
        self.run_dir
            .join(format!("round-{}", round))
            .join("messages.jsonl")
    }

    pub fn append(&self, message: &AgentMessage) -> Result<()> {
        let path = self.round_file(message.round);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create message log directory")?;
        }

        let mut line = serde_json::to_string(message).context("Failed to serialize message")?;
        line.push('\n');

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open message log {}", path.display()))?
            .write_all(line.as_bytes())
            .context("Failed to write message log entry")?;

        Ok(())
    }

    /// Read back every message recorded for a round, skipping malformed lines.
    pub fn read_round(&self, round: u32) -> Result<Vec<AgentMessage>> {
        let path = self.round_file(round);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).context("Failed to read message log")?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
