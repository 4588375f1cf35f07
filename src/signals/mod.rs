//! Text signals parsed from agent artifacts.
//!
//! Agents return unstructured text. This module pulls out the handful of
//! markers the orchestrator relies on:
//!
//! - `STATUS: PASS|REVISE|FAIL` from the coordinator
//! - `STATUS: PASS|FAIL` from the evaluator
//! - `DECISION: APPROVE|REJECT` from the auditor
//! - `[HIGH]` / `[MED]` / `[LOW]` defect tags and risk bullets

mod parser;
mod types;

pub use parser::{
    MAX_RISK_BULLETS, count_defects, excerpt, parse_audit_decision, parse_coordinator_status,
    parse_evaluator_status, parse_risks,
};
pub use types::{AuditDecision, CoordinatorStatus, DefectCounts, EvaluatorStatus};
