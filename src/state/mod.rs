//! Run state: the data model of one orchestration run and the store that owns it.
//!
//! Everything mutable about a run lives in [`RunState`], owned by a
//! [`RunStore`]. Other components only ever see deep copies returned by
//! [`RunStore::get_state`] and mutate through the store's methods.

mod messages;
mod store;

pub use messages::MessageLog;
pub use store::{Listener, RunFlags, RunStore, StoreConfig, Subscription};

use crate::checkpoint::Checkpoint;
use crate::signals::{AuditDecision, CoordinatorStatus, DefectCounts, EvaluatorStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of events retained in the ring buffer.
pub const DEFAULT_EVENT_CAP: usize = 500;

/// Maximum number of changed files kept on a round summary.
pub const CHANGED_FILES_CAP: usize = 50;

/// How agent turns are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Spawn the configured agent binary as a subprocess.
    #[default]
    Local,
    /// Produce canned output without launching anything.
    Demo,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Demo => write!(f, "demo"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ExecutionMode::Local),
            "demo" => Ok(ExecutionMode::Demo),
            _ => anyhow::bail!("Invalid execution mode '{}'. Valid values: local, demo", s),
        }
    }
}

/// Optional behaviours of the round pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Checkpoints,
    Research,
    LintLoop,
    HeuristicSelector,
    EnsembleVoting,
    ContextCompression,
    HumanInLoop,
    ApproveNextAction,
}

impl Feature {
    pub const ALL: [Feature; 8] = [
        Feature::Checkpoints,
        Feature::Research,
        Feature::LintLoop,
        Feature::HeuristicSelector,
        Feature::EnsembleVoting,
        Feature::ContextCompression,
        Feature::HumanInLoop,
        Feature::ApproveNextAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Checkpoints => "checkpoints",
            Feature::Research => "research",
            Feature::LintLoop => "lint_loop",
            Feature::HeuristicSelector => "heuristic_selector",
            Feature::EnsembleVoting => "ensemble_voting",
            Feature::ContextCompression => "context_compression",
            Feature::HumanInLoop => "human_in_loop",
            Feature::ApproveNextAction => "approve_next_action",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| {
                let valid: Vec<_> = Feature::ALL.iter().map(|f| f.as_str()).collect();
                anyhow::anyhow!("Unknown feature '{}'. Valid values: {}", s, valid.join(", "))
            })
    }
}

pub type FeatureSet = BTreeSet<Feature>;

/// The five fixed agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Research,
    /// Also known as worker1.
    Implementer,
    /// Also known as worker2.
    Auditor,
    Evaluator,
    Coordinator,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Research,
        Role::Implementer,
        Role::Auditor,
        Role::Evaluator,
        Role::Coordinator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Research => "research",
            Role::Implementer => "implementer",
            Role::Auditor => "auditor",
            Role::Evaluator => "evaluator",
            Role::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "research" => Ok(Role::Research),
            "implementer" | "worker1" => Ok(Role::Implementer),
            "auditor" | "worker2" => Ok(Role::Auditor),
            "evaluator" => Ok(Role::Evaluator),
            "coordinator" => Ok(Role::Coordinator),
            _ => anyhow::bail!("Unknown agent role '{}'", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    #[default]
    Idle,
    Queued,
    Running,
    Completed,
    Failed,
}

impl AgentPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, AgentPhase::Queued | AgentPhase::Running)
    }
}

/// Perceive/decide/act sub-stage of a running turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdaStage {
    Perceive,
    Decide,
    Act,
}

impl PdaStage {
    pub const ORDER: [PdaStage; 3] = [PdaStage::Perceive, PdaStage::Decide, PdaStage::Act];

    pub fn as_str(&self) -> &'static str {
        match self {
            PdaStage::Perceive => "perceive",
            PdaStage::Decide => "decide",
            PdaStage::Act => "act",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub role: Role,
    pub phase: AgentPhase,
    pub round: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub artifact: Option<PathBuf>,
    pub excerpt: Option<String>,
    pub stage: Option<PdaStage>,
    /// Who the agent's current message is addressed to.
    pub target: Option<String>,
    pub last_hash: Option<String>,
}

impl AgentState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            phase: AgentPhase::Idle,
            round: 0,
            started_at: None,
            ended_at: None,
            artifact: None,
            excerpt: None,
            stage: None,
            target: None,
            last_hash: None,
        }
    }

    fn apply(&mut self, patch: AgentPatch) {
        if let Some(phase) = patch.phase {
            self.phase = phase;
        }
        if let Some(round) = patch.round {
            self.round = round;
        }
        if let Some(at) = patch.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = patch.ended_at {
            self.ended_at = Some(at);
        }
        if let Some(artifact) = patch.artifact {
            self.artifact = Some(artifact);
        }
        if let Some(excerpt) = patch.excerpt {
            self.excerpt = Some(excerpt);
        }
        if let Some(stage) = patch.stage {
            self.stage = Some(stage);
        }
        if let Some(target) = patch.target {
            self.target = Some(target);
        }
        if let Some(hash) = patch.last_hash {
            self.last_hash = Some(hash);
        }
    }
}

/// Partial update for an [`AgentState`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub phase: Option<AgentPhase>,
    pub round: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub artifact: Option<PathBuf>,
    pub excerpt: Option<String>,
    pub stage: Option<PdaStage>,
    pub target: Option<String>,
    pub last_hash: Option<String>,
}

impl AgentPatch {
    pub fn phase(phase: AgentPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    pub fn stage(stage: PdaStage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundVerdict {
    Running,
    Pass,
    Revise,
    Fail,
}

impl fmt::Display for RoundVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundVerdict::Running => write!(f, "RUNNING"),
            RoundVerdict::Pass => write!(f, "PASS"),
            RoundVerdict::Revise => write!(f, "REVISE"),
            RoundVerdict::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub verdict: RoundVerdict,
    pub auditor_decision: Option<AuditDecision>,
    pub evaluator_status: Option<EvaluatorStatus>,
    pub coordinator_status: Option<CoordinatorStatus>,
    pub lint_passed: Option<bool>,
    pub auditor_skipped: bool,
    pub changed_files: Vec<String>,
    pub notes: Vec<String>,
    #[serde(default)]
    pub defects: DefectCounts,
    #[serde(default)]
    pub rewound: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RoundSummary {
    /// A placeholder summary for a round that has just started.
    pub fn running(round: u32) -> Self {
        Self {
            round,
            verdict: RoundVerdict::Running,
            auditor_decision: None,
            evaluator_status: None,
            coordinator_status: None,
            lint_passed: None,
            auditor_skipped: false,
            changed_files: Vec::new(),
            notes: Vec::new(),
            defects: DefectCounts::default(),
            rewound: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Replace the changed-file list, keeping at most [`CHANGED_FILES_CAP`] entries.
    pub fn set_changed_files(&mut self, files: &[String]) {
        self.changed_files = files.iter().take(CHANGED_FILES_CAP).cloned().collect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintResult {
    pub round: u32,
    pub status: LintStatus,
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    /// Tail of combined stdout/stderr, or the reason lint was skipped.
    pub output_excerpt: String,
    pub duration_ms: u64,
}

impl LintResult {
    pub fn skipped(round: u32, reason: impl Into<String>) -> Self {
        Self {
            round,
            status: LintStatus::Skipped,
            command: None,
            exit_code: None,
            output_excerpt: reason.into(),
            duration_ms: 0,
        }
    }

    pub fn failed(&self) -> bool {
        self.status == LintStatus::Failed
    }
}

/// Prompt flavour of a coordinator ensemble member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsembleVariant {
    Strict,
    Balanced,
    Risk,
}

impl EnsembleVariant {
    /// Tally order. Ties resolve to the earliest entry.
    pub const ORDER: [EnsembleVariant; 3] = [
        EnsembleVariant::Strict,
        EnsembleVariant::Balanced,
        EnsembleVariant::Risk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleVariant::Strict => "strict",
            EnsembleVariant::Balanced => "balanced",
            EnsembleVariant::Risk => "risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleVote {
    pub variant: EnsembleVariant,
    pub status: CoordinatorStatus,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub round: u32,
    pub votes: Vec<EnsembleVote>,
    /// (status, votes) in first-encountered order.
    pub tally: Vec<(CoordinatorStatus, u32)>,
    pub selected_status: CoordinatorStatus,
    pub selected_variant: EnsembleVariant,
}

/// Who sent or receives an [`AgentMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    Agent(Role),
    System,
    Broadcast,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Agent(role) => f.write_str(role.as_str()),
            Endpoint::System => f.write_str("system"),
            Endpoint::Broadcast => f.write_str("broadcast"),
        }
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl TryFrom<String> for Endpoint {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "system" => Ok(Endpoint::System),
            "broadcast" => Ok(Endpoint::Broadcast),
            other => other.parse().map(Endpoint::Agent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Task,
    Result,
    Feedback,
    Error,
    Control,
}

/// Append-only record of inter-agent communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub timestamp: DateTime<Utc>,
    pub round: u32,
    pub from: Endpoint,
    pub to: Endpoint,
    pub kind: MessageKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl AgentMessage {
    pub fn new(
        round: u32,
        from: Endpoint,
        to: Endpoint,
        kind: MessageKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            round,
            from,
            to,
            kind,
            summary: summary.into(),
            artifact: None,
            hash: None,
        }
    }

    pub fn with_artifact(mut self, artifact: PathBuf, hash: Option<String>) -> Self {
        self.artifact = Some(artifact);
        self.hash = hash;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Type tag of a [`RunEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "run.finished")]
    RunFinished,
    #[serde(rename = "run.failed")]
    RunFailed,
    #[serde(rename = "run.paused")]
    RunPaused,
    #[serde(rename = "run.resumed")]
    RunResumed,
    #[serde(rename = "run.waiting")]
    RunWaiting,
    #[serde(rename = "run.approval_requested")]
    ApprovalRequested,
    #[serde(rename = "run.approved")]
    Approved,
    #[serde(rename = "run.rewind")]
    Rewind,
    #[serde(rename = "round.started")]
    RoundStarted,
    #[serde(rename = "round.finished")]
    RoundFinished,
    #[serde(rename = "agent.started")]
    AgentStarted,
    #[serde(rename = "agent.stage")]
    AgentStage,
    #[serde(rename = "agent.finished")]
    AgentFinished,
    #[serde(rename = "agent.failed")]
    AgentFailed,
    #[serde(rename = "agent.skipped")]
    AgentSkipped,
    #[serde(rename = "agent.safety_warning")]
    SafetyWarning,
    #[serde(rename = "checkpoint.created")]
    CheckpointCreated,
    #[serde(rename = "lint.finished")]
    LintFinished,
    #[serde(rename = "ensemble.finished")]
    EnsembleFinished,
    #[serde(rename = "research.augmented")]
    ResearchAugmented,
    #[serde(rename = "research.augmentation_failed")]
    ResearchAugmentationFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RunStarted => "run.started",
            EventKind::RunFinished => "run.finished",
            EventKind::RunFailed => "run.failed",
            EventKind::RunPaused => "run.paused",
            EventKind::RunResumed => "run.resumed",
            EventKind::RunWaiting => "run.waiting",
            EventKind::ApprovalRequested => "run.approval_requested",
            EventKind::Approved => "run.approved",
            EventKind::Rewind => "run.rewind",
            EventKind::RoundStarted => "round.started",
            EventKind::RoundFinished => "round.finished",
            EventKind::AgentStarted => "agent.started",
            EventKind::AgentStage => "agent.stage",
            EventKind::AgentFinished => "agent.finished",
            EventKind::AgentFailed => "agent.failed",
            EventKind::AgentSkipped => "agent.skipped",
            EventKind::SafetyWarning => "agent.safety_warning",
            EventKind::CheckpointCreated => "checkpoint.created",
            EventKind::LintFinished => "lint.finished",
            EventKind::EnsembleFinished => "ensemble.finished",
            EventKind::ResearchAugmented => "research.augmented",
            EventKind::ResearchAugmentationFailed => "research.augmentation_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, sequentially numbered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: u64,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub round: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// An event before the store assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub message: String,
    /// Defaults to the run's current round when unset.
    pub round: Option<u32>,
    pub severity: Option<Severity>,
    pub agent: Option<Role>,
    pub metadata: Option<serde_json::Value>,
}

impl NewEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            round: None,
            severity: None,
            agent: None,
            metadata: None,
        }
    }

    pub fn round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn agent(mut self, role: Role) -> Self {
        self.agent = Some(role);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn warning(self) -> Self {
        self.severity(Severity::Warning)
    }

    pub fn error(self) -> Self {
        self.severity(Severity::Error)
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Outstanding request for operator approval before an agent acts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub round: u32,
    pub agent: Role,
    pub gate: String,
    pub requested_at: DateTime<Utc>,
}

/// Inputs for starting a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    pub mode: ExecutionMode,
    pub workspace: PathBuf,
    pub goal: String,
    pub max_rounds: u32,
    pub features: FeatureSet,
    /// Where artifacts and message logs go. Defaults to `<workspace>/.roundtable/runs`.
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(workspace: impl Into<PathBuf>, mode: ExecutionMode) -> Self {
        Self {
            mode,
            workspace: workspace.into(),
            goal: String::new(),
            max_rounds: 3,
            features: FeatureSet::new(),
            artifacts_dir: None,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature);
        self
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = Feature>) -> Self {
        self.features.extend(features);
        self
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub fn artifacts_root(&self) -> PathBuf {
        self.artifacts_dir
            .clone()
            .unwrap_or_else(|| self.workspace.join(".roundtable").join("runs"))
    }
}

/// What `start_run` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub run_id: String,
    pub mode: ExecutionMode,
    pub workspace: PathBuf,
    pub max_rounds: u32,
    pub features: FeatureSet,
    pub started_at: DateTime<Utc>,
    /// Directory holding this run's artifacts and message logs.
    pub run_dir: PathBuf,
}

/// Point-in-time copy of everything known about the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Incremented on every mutation.
    pub version: u64,
    pub run_id: Option<String>,
    pub mode: ExecutionMode,
    pub workspace: Option<PathBuf>,
    pub run_dir: Option<PathBuf>,
    pub goal: String,
    pub max_rounds: u32,
    pub running: bool,
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub pending_approval: Option<PendingApproval>,
    pub current_round: u32,
    pub features: FeatureSet,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    /// Terminal message set by finish/fail.
    pub outcome: Option<String>,
    pub agents: BTreeMap<Role, AgentState>,
    pub rounds: Vec<RoundSummary>,
    pub lint_results: Vec<LintResult>,
    pub ensemble_results: Vec<EnsembleResult>,
    pub checkpoints: Vec<Checkpoint>,
    pub events: VecDeque<RunEvent>,
    pub messages: VecDeque<AgentMessage>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            version: 0,
            run_id: None,
            mode: ExecutionMode::default(),
            workspace: None,
            run_dir: None,
            goal: String::new(),
            max_rounds: 0,
            running: false,
            paused: false,
            pause_reason: None,
            pending_approval: None,
            current_round: 0,
            features: FeatureSet::new(),
            started_at: None,
            ended_at: None,
            errors: Vec::new(),
            outcome: None,
            agents: Role::ALL.iter().map(|r| (*r, AgentState::new(*r))).collect(),
            rounds: Vec::new(),
            lint_results: Vec::new(),
            ensemble_results: Vec::new(),
            checkpoints: Vec::new(),
            events: VecDeque::new(),
            messages: VecDeque::new(),
        }
    }
}

impl RunState {
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn agent(&self, role: Role) -> Option<&AgentState> {
        self.agents.get(&role)
    }

    pub fn round(&self, round: u32) -> Option<&RoundSummary> {
        self.rounds.iter().find(|r| r.round == round)
    }

    pub fn lint_result(&self, round: u32) -> Option<&LintResult> {
        self.lint_results.iter().find(|r| r.round == round)
    }

    pub fn ensemble_result(&self, round: u32) -> Option<&EnsembleResult> {
        self.ensemble_results.iter().find(|r| r.round == round)
    }

    pub fn checkpoint(&self, round: u32) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.round == round)
    }

    pub fn events_of(&self, kind: EventKind) -> impl Iterator<Item = &RunEvent> {
        self.events.iter().filter(move |e| e.kind == kind)
    }
}

/// Replace the entry whose key matches, or append.
pub(crate) fn upsert_by<T, K: PartialEq>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> K) {
    let k = key(&item);
    match items.iter().position(|existing| key(existing) == k) {
        Some(idx) => items[idx] = item,
        None => items.push(item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_from_str_accepts_dashes() {
        assert_eq!(
            "ensemble-voting".parse::<Feature>().unwrap(),
            Feature::EnsembleVoting
        );
        assert_eq!("LINT_LOOP".parse::<Feature>().unwrap(), Feature::LintLoop);
        assert!("telepathy".parse::<Feature>().is_err());
    }

    #[test]
    fn test_role_aliases() {
        assert_eq!("worker1".parse::<Role>().unwrap(), Role::Implementer);
        assert_eq!("worker2".parse::<Role>().unwrap(), Role::Auditor);
    }

    #[test]
    fn test_endpoint_serializes_as_plain_string() {
        let msg = AgentMessage::new(
            2,
            Endpoint::System,
            Endpoint::Agent(Role::Auditor),
            MessageKind::Task,
            "audit",
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["from"], "system");
        assert_eq!(json["to"], "auditor");
        assert_eq!(json["kind"], "task");
        let back: AgentMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_event_kind_serde_matches_as_str() {
        for kind in [
            EventKind::RunStarted,
            EventKind::ApprovalRequested,
            EventKind::Rewind,
            EventKind::SafetyWarning,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn test_upsert_by_replaces_existing_key() {
        let mut rounds = vec![RoundSummary::running(1), RoundSummary::running(2)];
        let mut replacement = RoundSummary::running(1);
        replacement.verdict = RoundVerdict::Pass;
        upsert_by(&mut rounds, replacement, |r| r.round);
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].verdict, RoundVerdict::Pass);

        upsert_by(&mut rounds, RoundSummary::running(3), |r| r.round);
        assert_eq!(rounds.len(), 3);
    }

    #[test]
    fn test_changed_files_are_capped() {
        let files: Vec<String> = (0..80).map(|i| format!("src/f{i}.rs")).collect();
        let mut summary = RoundSummary::running(1);
        summary.set_changed_files(&files);
        assert_eq!(summary.changed_files.len(), CHANGED_FILES_CAP);
        assert_eq!(summary.changed_files[0], "src/f0.rs");
    }

    #[test]
    fn test_artifacts_root_defaults_under_workspace() {
        let opts = RunOptions::new("/ws", ExecutionMode::Demo);
        assert_eq!(
            opts.artifacts_root(),
            PathBuf::from("/ws/.roundtable/runs")
        );
    }
}
