//! Signal parsing from agent output.
//!
//! Agents write free-form text; the orchestrator only depends on a few
//! line-oriented markers:
//! - `STATUS: PASS|REVISE|FAIL` (coordinator)
//! - `STATUS: PASS|FAIL` (evaluator)
//! - `DECISION: APPROVE|REJECT` (auditor)
//! - `[HIGH]` / `[MED]` / `[LOW]` defect tags (auditor)

use super::types::{AuditDecision, CoordinatorStatus, DefectCounts, EvaluatorStatus};
use regex::Regex;
use std::sync::LazyLock;

static COORDINATOR_STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*_#`-]*STATUS\s*[:=]\s*\**\s*(PASS|REVISE|FAIL)\b").unwrap()
});

static EVALUATOR_STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*_#`-]*STATUS\s*[:=]\s*\**\s*(PASS|FAIL)\b").unwrap()
});

static DECISION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s>*_#`-]*DECISION\s*[:=]\s*\**\s*(APPROVE|REJECT)\b").unwrap()
});

static DEFECT_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[(HIGH|MED|MEDIUM|LOW)\]").unwrap());

static BULLET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.+)$").unwrap());

static RISK_HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*#*\s*\**\s*(risks?|defects?|findings?)\b").unwrap());

/// Maximum risk bullets carried into round notes.
pub const MAX_RISK_BULLETS: usize = 5;

/// First `STATUS:` line with a coordinator value, if any.
pub fn parse_coordinator_status(text: &str) -> Option<CoordinatorStatus> {
    let cap = COORDINATOR_STATUS_REGEX.captures(text)?;
    match cap.get(1)?.as_str().to_uppercase().as_str() {
        "PASS" => Some(CoordinatorStatus::Pass),
        "REVISE" => Some(CoordinatorStatus::Revise),
        "FAIL" => Some(CoordinatorStatus::Fail),
        _ => None,
    }
}

pub fn parse_evaluator_status(text: &str) -> Option<EvaluatorStatus> {
    let cap = EVALUATOR_STATUS_REGEX.captures(text)?;
    match cap.get(1)?.as_str().to_uppercase().as_str() {
        "PASS" => Some(EvaluatorStatus::Pass),
        "FAIL" => Some(EvaluatorStatus::Fail),
        _ => None,
    }
}

pub fn parse_audit_decision(text: &str) -> Option<AuditDecision> {
    let cap = DECISION_REGEX.captures(text)?;
    match cap.get(1)?.as_str().to_uppercase().as_str() {
        "APPROVE" => Some(AuditDecision::Approve),
        "REJECT" => Some(AuditDecision::Reject),
        _ => None,
    }
}

pub fn count_defects(text: &str) -> DefectCounts {
    let mut counts = DefectCounts::default();
    for cap in DEFECT_TAG_REGEX.captures_iter(text) {
        match cap[1].to_uppercase().as_str() {
            "HIGH" => counts.high += 1,
            "MED" | "MEDIUM" => counts.medium += 1,
            _ => counts.low += 1,
        }
    }
    counts
}

/// Bullet lines that carry a defect tag or sit under a risks/defects/findings
/// heading, in document order, at most [`MAX_RISK_BULLETS`].
pub fn parse_risks(text: &str) -> Vec<String> {
    let mut risks = Vec::new();
    let mut in_risk_section = false;

    for line in text.lines() {
        let Some(cap) = BULLET_REGEX.captures(line) else {
            if RISK_HEADING_REGEX.is_match(line) {
                in_risk_section = true;
            } else if !line.trim().is_empty() {
                // Any other non-bullet text closes a risk section.
                in_risk_section = false;
            }
            continue;
        };
        let item = cap[1].trim();
        if in_risk_section || DEFECT_TAG_REGEX.is_match(item) {
            risks.push(item.to_string());
            if risks.len() >= MAX_RISK_BULLETS {
                break;
            }
        }
    }

    risks
}

/// Short preview of agent output: the first `max_lines` non-empty lines
/// outside code fences, joined with ` / `, cut at `max_chars` characters.
pub fn excerpt(text: &str, max_lines: usize, max_chars: usize) -> String {
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .take(max_lines)
        .collect::<Vec<_>>()
        .join(" / ");

    if joined.chars().count() <= max_chars {
        return joined;
    }
    let mut cut: String = joined.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
