use crate::signals::{AuditDecision, CoordinatorStatus, DefectCounts, EvaluatorStatus};
use crate::state::RoundVerdict;

/// Parsed outcome of one round, with missing markers already defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSignals {
    pub coordinator: CoordinatorStatus,
    pub evaluator: EvaluatorStatus,
    pub auditor: AuditDecision,
    pub lint_failed: bool,
    pub defects: DefectCounts,
}

impl RoundSignals {
    /// Missing status lines count as coordinator REVISE, evaluator FAIL and
    /// auditor REJECT.
    pub fn from_parsed(
        coordinator: Option<CoordinatorStatus>,
        evaluator: Option<EvaluatorStatus>,
        auditor: Option<AuditDecision>,
        lint_failed: bool,
        defects: DefectCounts,
    ) -> Self {
        Self {
            coordinator: coordinator.unwrap_or(CoordinatorStatus::Revise),
            evaluator: evaluator.unwrap_or(EvaluatorStatus::Fail),
            auditor: auditor.unwrap_or(AuditDecision::Reject),
            lint_failed,
            defects,
        }
    }
}

/// Precedence: coordinator FAIL, then lint failure, then unanimous pass.
pub fn derive_verdict(signals: &RoundSignals) -> RoundVerdict {
    if signals.coordinator == CoordinatorStatus::Fail {
        return RoundVerdict::Fail;
    }
    if signals.lint_failed {
        return RoundVerdict::Revise;
    }
    if signals.coordinator == CoordinatorStatus::Pass
        && signals.evaluator == EvaluatorStatus::Pass
        && signals.auditor.is_clearance()
    {
        return RoundVerdict::Pass;
    }
    RoundVerdict::Revise
}

/// Roll back to the previous round's checkpoint when this round made
/// things worse. LOW defects never trigger a rewind.
pub fn should_auto_rewind(checkpoints_enabled: bool, round: u32, signals: &RoundSignals) -> bool {
    checkpoints_enabled
        && round > 1
        && (signals.coordinator == CoordinatorStatus::Fail
            || (signals.lint_failed && signals.defects.serious() > 0))
}
