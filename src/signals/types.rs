//! Structured signals extracted from agent output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinator verdict line: `STATUS: PASS|REVISE|FAIL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorStatus {
    Pass,
    Revise,
    Fail,
}

impl fmt::Display for CoordinatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorStatus::Pass => write!(f, "PASS"),
            CoordinatorStatus::Revise => write!(f, "REVISE"),
            CoordinatorStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// Evaluator verdict line: `STATUS: PASS|FAIL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluatorStatus {
    Pass,
    Fail,
}

impl fmt::Display for EvaluatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluatorStatus::Pass => write!(f, "PASS"),
            EvaluatorStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// Auditor decision line: `DECISION: APPROVE|REJECT`.
///
/// `SkippedNoChanges` never comes from an agent; the orchestrator
/// synthesizes it when the auditor is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditDecision {
    Approve,
    Reject,
    SkippedNoChanges,
}

impl AuditDecision {
    /// Whether this decision lets a round pass.
    pub fn is_clearance(&self) -> bool {
        matches!(self, AuditDecision::Approve | AuditDecision::SkippedNoChanges)
    }
}

impl fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditDecision::Approve => write!(f, "APPROVE"),
            AuditDecision::Reject => write!(f, "REJECT"),
            AuditDecision::SkippedNoChanges => write!(f, "SKIPPED_NO_CHANGES"),
        }
    }
}

/// Inline defect tags counted in auditor output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectCounts {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl DefectCounts {
    /// High plus medium. Low-severity defects are informational.
    pub fn serious(&self) -> u32 {
        self.high + self.medium
    }

    pub fn total(&self) -> u32 {
        self.high + self.medium + self.low
    }
}
