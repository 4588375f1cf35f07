//! Configuration for roundtable.
//!
//! Settings are read from `<workspace>/.roundtable/roundtable.toml`, then
//! overridden by environment variables, then by CLI flags.
//!
//! ```toml
//! [agent]
//! command = "claude"
//! args = ["--print"]
//! timeout_secs = 900
//!
//! [run]
//! mode = "local"
//! max_rounds = 3
//! features = ["checkpoints", "lint_loop", "heuristic_selector"]
//!
//! [workspace]
//! tracked_targets = ["src", "tests", "package.json"]
//!
//! [lint]
//! command = "cargo clippy --quiet"
//! timeout_secs = 300
//!
//! [research]
//! augment = true
//! endpoint = "https://research.example.com/augment"
//! ```

use crate::checkpoint::{DEFAULT_IGNORED_DIRS, DEFAULT_TRACKED_TARGETS, TrackedPaths};
use crate::state::{DEFAULT_EVENT_CAP, ExecutionMode, Feature, FeatureSet, StoreConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".roundtable";
pub const CONFIG_FILE: &str = "roundtable.toml";

pub const ENV_MODE: &str = "ROUNDTABLE_MODE";
pub const ENV_FORCE_DEMO: &str = "ROUNDTABLE_FORCE_DEMO";
pub const ENV_AGENT_CMD: &str = "ROUNDTABLE_AGENT_CMD";
pub const ENV_RESEARCH_AUGMENT: &str = "ROUNDTABLE_RESEARCH_AUGMENT";
pub const ENV_RESEARCH_ENDPOINT: &str = "ROUNDTABLE_RESEARCH_ENDPOINT";
pub const ENV_RESEARCH_API_KEY: &str = "ROUNDTABLE_RESEARCH_API_KEY";

/// How the agent binary is launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_agent_timeout_secs() -> u64 {
    900
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default)]
    pub features: Vec<Feature>,
}

fn default_max_rounds() -> u32 {
    3
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            max_rounds: default_max_rounds(),
            features: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSection {
    #[serde(default = "default_tracked_targets")]
    pub tracked_targets: Vec<String>,
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
}

fn default_tracked_targets() -> Vec<String> {
    DEFAULT_TRACKED_TARGETS.iter().map(|s| s.to_string()).collect()
}

fn default_ignored_dirs() -> Vec<String> {
    DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect()
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            tracked_targets: default_tracked_targets(),
            ignored_dirs: default_ignored_dirs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintSection {
    /// Overrides `package.json` script detection when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_lint_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_lint_timeout_secs() -> u64 {
    300
}

impl Default for LintSection {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_lint_timeout_secs(),
        }
    }
}

/// Head/tail budget used when `context_compression` is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_context_chars")]
    pub head_chars: usize,
    #[serde(default = "default_context_chars")]
    pub tail_chars: usize,
}

fn default_context_chars() -> usize {
    1500
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            head_chars: default_context_chars(),
            tail_chars: default_context_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatesSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for GatesSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsSection {
    #[serde(default = "default_event_cap")]
    pub cap: usize,
}

fn default_event_cap() -> usize {
    DEFAULT_EVENT_CAP
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            cap: default_event_cap(),
        }
    }
}

/// Simulated latency window for `demo` mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoSection {
    #[serde(default = "default_demo_min_latency_ms")]
    pub min_latency_ms: u64,
    #[serde(default = "default_demo_max_latency_ms")]
    pub max_latency_ms: u64,
}

fn default_demo_min_latency_ms() -> u64 {
    150
}

fn default_demo_max_latency_ms() -> u64 {
    450
}

impl Default for DemoSection {
    fn default() -> Self {
        Self {
            min_latency_ms: default_demo_min_latency_ms(),
            max_latency_ms: default_demo_max_latency_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchSection {
    #[serde(default)]
    pub augment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Only ever read from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Parsed roundtable.toml plus environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub lint: LintSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub demo: DemoSection,
    #[serde(default)]
    pub research: ResearchSection,
    /// Set by `ROUNDTABLE_FORCE_DEMO`; beats every other mode source.
    #[serde(skip)]
    pub force_demo: bool,
}

impl Settings {
    pub fn config_path(workspace: &Path) -> PathBuf {
        workspace.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse roundtable.toml")
    }

    /// Load `<workspace>/.roundtable/roundtable.toml`, or defaults when absent.
    pub fn load_or_default(workspace: &Path) -> Result<Self> {
        let path = Self::config_path(workspace);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// File settings with process environment overrides applied.
    pub fn for_workspace(workspace: &Path) -> Result<Self> {
        let mut settings = Self::load_or_default(workspace)?;
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize roundtable.toml")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `ROUNDTABLE_*` overrides read through `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(mode) = lookup(ENV_MODE) {
            match mode.parse::<ExecutionMode>() {
                Ok(mode) => self.run.mode = mode,
                Err(e) => tracing::warn!("Ignoring {}: {}", ENV_MODE, e),
            }
        }
        if let Some(value) = lookup(ENV_FORCE_DEMO) {
            self.force_demo = is_truthy(&value);
        }
        if let Some(command) = lookup(ENV_AGENT_CMD).filter(|c| !c.trim().is_empty()) {
            self.agent.command = command;
        }
        if let Some(value) = lookup(ENV_RESEARCH_AUGMENT) {
            self.research.augment = is_truthy(&value);
        }
        if let Some(endpoint) = lookup(ENV_RESEARCH_ENDPOINT).filter(|e| !e.trim().is_empty()) {
            self.research.endpoint = Some(endpoint);
        }
        if let Some(key) = lookup(ENV_RESEARCH_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.research.api_key = Some(key);
        }
    }

    /// CLI mode beats the file/env mode; force-demo beats both.
    pub fn effective_mode(&self, cli: Option<ExecutionMode>) -> ExecutionMode {
        if self.force_demo {
            ExecutionMode::Demo
        } else {
            cli.unwrap_or(self.run.mode)
        }
    }

    pub fn feature_set(&self) -> FeatureSet {
        self.run.features.iter().copied().collect()
    }

    pub fn tracked_paths(&self) -> TrackedPaths {
        TrackedPaths {
            targets: self.workspace.tracked_targets.clone(),
            ignored_dirs: self.workspace.ignored_dirs.clone(),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            event_cap: self.events.cap.max(1),
        }
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }

    pub fn lint_timeout(&self) -> Duration {
        Duration::from_secs(self.lint.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.gates.poll_interval_ms)
    }

    pub fn demo_latency(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.demo.min_latency_ms),
            Duration::from_millis(self.demo.max_latency_ms),
        )
    }

    /// Validate and return warnings. Nothing here is fatal; see [`Settings::check`].
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.run.max_rounds == 0 {
            warnings.push("run.max_rounds is 0; runs will finish without doing any work".into());
        }
        if self.agent.command.trim().is_empty() {
            warnings.push("agent.command is empty; local mode cannot launch agents".into());
        }
        if self.agent.timeout_secs == 0 {
            warnings.push("agent.timeout_secs is 0; every agent turn will time out".into());
        }
        if self.lint.timeout_secs == 0 {
            warnings.push("lint.timeout_secs is 0; every lint run will time out".into());
        }
        if self.gates.poll_interval_ms == 0 {
            warnings.push("gates.poll_interval_ms is 0; paused runs will busy-poll".into());
        }
        if self.events.cap == 0 {
            warnings.push("events.cap is 0; it will be raised to 1".into());
        }
        if self.demo.min_latency_ms > self.demo.max_latency_ms {
            warnings.push(format!(
                "demo.min_latency_ms ({}) exceeds demo.max_latency_ms ({}); the minimum is used",
                self.demo.min_latency_ms, self.demo.max_latency_ms
            ));
        }
        if self.run.features.contains(&Feature::ContextCompression)
            && (self.context.head_chars == 0 || self.context.tail_chars == 0)
        {
            warnings.push("context_compression is enabled but head_chars or tail_chars is 0".into());
        }
        if self.research.augment && self.research.endpoint.is_none() {
            warnings.push("research.augment is on but research.endpoint is not set".into());
        }
        if self.research.augment && !self.run.features.contains(&Feature::Research) {
            warnings.push("research.augment has no effect unless the research feature is enabled".into());
        }
        if self.workspace.tracked_targets.is_empty() {
            warnings.push("workspace.tracked_targets is empty; no changes will ever be detected".into());
        }

        warnings
    }

    /// Fatal problems. A run, rewind or checkpoint listing must not proceed
    /// past these.
    pub fn check(&self) -> Result<()> {
        self.tracked_paths()
            .validate()
            .context("Invalid workspace.tracked_targets")?;
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
