//! Prompt construction for each role.
//!
//! Prompts are plain markdown: a shared header, the role's task and output
//! contract, then whatever context the round has gathered so far.

use crate::state::{EnsembleVariant, LintResult, LintStatus, Role};

/// Round context available when a prompt is built.
#[derive(Debug, Clone, Default)]
pub struct PromptContext<'a> {
    pub goal: &'a str,
    pub round: u32,
    pub max_rounds: u32,
    pub research: Option<&'a str>,
    /// Evaluator output carried over from the previous round.
    pub feedback: Option<&'a str>,
    /// Extra findings from the research augmentation provider.
    pub augmentation: Option<&'a str>,
    pub changed_files: &'a [String],
    pub lint: Option<&'a LintResult>,
    /// Outputs of earlier roles in this round, in turn order.
    pub reports: Vec<(Role, &'a str)>,
}

pub fn build_prompt(role: Role, ctx: &PromptContext<'_>, variant: Option<EnsembleVariant>) -> String {
    let goal = if ctx.goal.trim().is_empty() {
        "(no explicit goal; improve the workspace conservatively)"
    } else {
        ctx.goal.trim()
    };

    let mut prompt = format!(
        "You are the {} agent in round {} of {}.\n\n## GOAL\n{}\n\n## TASK\n{}\n",
        role,
        ctx.round,
        ctx.max_rounds,
        goal,
        task_for(role)
    );

    if let Some(variant) = variant {
        prompt.push_str(&format!("\n## REVIEW LENS\n{}\n", variant_lens(variant)));
    }

    if let Some(augmentation) = ctx.augmentation {
        section(&mut prompt, "EXTERNAL RESEARCH", augmentation);
    }
    if let Some(research) = ctx.research {
        section(&mut prompt, "RESEARCH NOTES", research);
    }
    if let Some(feedback) = ctx.feedback {
        section(&mut prompt, "FEEDBACK FROM PREVIOUS ROUND", feedback);
    }
    if matches!(role, Role::Auditor | Role::Evaluator | Role::Coordinator) {
        let files = if ctx.changed_files.is_empty() {
            "(no tracked files changed)".to_string()
        } else {
            ctx.changed_files
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        };
        section(&mut prompt, "CHANGED FILES", &files);
    }
    if let Some(lint) = ctx.lint {
        section(&mut prompt, "LINT", &describe_lint(lint));
    }
    for (from, report) in &ctx.reports {
        section(&mut prompt, &format!("{} REPORT", from.as_str().to_uppercase()), report);
    }

    prompt
}

fn section(prompt: &mut String, title: &str, body: &str) {
    prompt.push_str(&format!("\n## {}\n{}\n", title, body.trim_end()));
}

fn task_for(role: Role) -> &'static str {
    match role {
        Role::Research => {
            "Survey the workspace and summarise what the implementer needs to know: \
             relevant files, conventions, and risks. Do not modify files."
        }
        Role::Implementer => {
            "Make the code changes that move the workspace toward the goal. \
             Address any feedback from the previous round first. \
             Summarise what you changed."
        }
        Role::Auditor => {
            "Review the changed files for defects. Tag each finding with [HIGH], [MED] or [LOW]. \
             End with exactly one line: DECISION: APPROVE or DECISION: REJECT."
        }
        Role::Evaluator => {
            "Check whether the workspace now satisfies the goal. Give concrete, actionable \
             feedback for anything missing. End with exactly one line: STATUS: PASS or STATUS: FAIL."
        }
        Role::Coordinator => {
            "Weigh the reports below and decide the round. End with exactly one line: \
             STATUS: PASS (goal met), STATUS: REVISE (another round), or STATUS: FAIL \
             (the round made things worse)."
        }
    }
}

fn variant_lens(variant: EnsembleVariant) -> &'static str {
    match variant {
        EnsembleVariant::Strict => {
            "Be strict: any unresolved defect or failing check means the goal is not met."
        }
        EnsembleVariant::Balanced => {
            "Be balanced: weigh the severity of open findings against the progress made."
        }
        EnsembleVariant::Risk => {
            "Focus on risk: prefer FAIL when a change could break existing behaviour."
        }
    }
}

fn describe_lint(lint: &LintResult) -> String {
    match lint.status {
        LintStatus::Skipped => format!("Skipped: {}", lint.output_excerpt),
        LintStatus::Passed => format!(
            "Passed ({})",
            lint.command.as_deref().unwrap_or("lint")
        ),
        LintStatus::Failed => format!(
            "Failed ({}, exit {}):\n{}",
            lint.command.as_deref().unwrap_or("lint"),
            lint.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            lint.output_excerpt
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_goal_and_contract() {
        let ctx = PromptContext {
            goal: "Add input validation",
            round: 2,
            max_rounds: 3,
            ..PromptContext::default()
        };
        let prompt = build_prompt(Role::Auditor, &ctx, None);
        assert!(prompt.starts_with("You are the auditor agent in round 2 of 3."));
        assert!(prompt.contains("Add input validation"));
        assert!(prompt.contains("DECISION: APPROVE or DECISION: REJECT"));
        assert!(prompt.contains("(no tracked files changed)"));
    }

    #[test]
    fn test_implementer_prompt_includes_feedback_not_files() {
        let ctx = PromptContext {
            goal: "g",
            round: 2,
            max_rounds: 3,
            feedback: Some("Validate input first.\nSTATUS: FAIL"),
            changed_files: &[],
            ..PromptContext::default()
        };
        let prompt = build_prompt(Role::Implementer, &ctx, None);
        assert!(prompt.contains("## FEEDBACK FROM PREVIOUS ROUND\nValidate input first."));
        assert!(!prompt.contains("CHANGED FILES"));
    }

    #[test]
    fn test_coordinator_variant_and_reports() {
        let files = vec!["src/lib.rs".to_string()];
        let ctx = PromptContext {
            goal: "g",
            round: 1,
            max_rounds: 1,
            changed_files: &files,
            reports: vec![(Role::Auditor, "DECISION: APPROVE"), (Role::Evaluator, "STATUS: PASS")],
            ..PromptContext::default()
        };
        let prompt = build_prompt(Role::Coordinator, &ctx, Some(EnsembleVariant::Risk));
        assert!(prompt.contains("## REVIEW LENS\nFocus on risk"));
        assert!(prompt.contains("- src/lib.rs"));
        assert!(prompt.contains("## AUDITOR REPORT\nDECISION: APPROVE"));
        assert!(prompt.contains("## EVALUATOR REPORT\nSTATUS: PASS"));
    }

    #[test]
    fn test_lint_failure_is_described() {
        let lint = LintResult {
            round: 1,
            status: LintStatus::Failed,
            command: Some("npm run lint --silent".into()),
            exit_code: Some(1),
            output_excerpt: "2 problems".into(),
            duration_ms: 10,
        };
        assert_eq!(
            describe_lint(&lint),
            "Failed (npm run lint --silent, exit 1):\n2 problems"
        );
    }
}
