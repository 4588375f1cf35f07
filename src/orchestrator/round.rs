use super::context::compress;
use super::ensemble;
use super::lint::LintRunner;
use super::verdict::{RoundSignals, derive_verdict, should_auto_rewind};
use crate::agent::augment::ResearchAugmenter;
use crate::agent::prompts::{PromptContext, build_prompt};
use crate::agent::{AgentExecutor, AgentTaskRunner, TurnOutcome, TurnRequest, artifact_path};
use crate::checkpoint::{CheckpointStore, collect_fingerprints, diff_fingerprints};
use crate::config::Settings;
use crate::errors::{GateError, OrchestratorError};
use crate::gates::Gates;
use crate::signals::{
    AuditDecision, CoordinatorStatus, DefectCounts, count_defects, excerpt, parse_audit_decision,
    parse_coordinator_status, parse_evaluator_status, parse_risks,
};
use crate::state::{
    EnsembleVariant, EnsembleVote, EventKind, Feature, FeatureSet, LintResult, LintStatus,
    NewEvent, Role, RoundSummary, RoundVerdict, RunDescriptor, RunStore,
};
use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;

const SKIPPED_AUDIT_TEXT: &str =
    "DECISION: SKIPPED_NO_CHANGES\n\nNo tracked files changed this round; audit skipped.\n";

/// Drives one run from round 1 until a PASS or the round limit.
pub struct RoundOrchestrator {
    store: Arc<RunStore>,
    runner: AgentTaskRunner,
    gates: Gates,
    checkpoints: CheckpointStore,
    lint: LintRunner,
    head_chars: usize,
    tail_chars: usize,
    augmenter: Option<Arc<dyn ResearchAugmenter>>,
    workspace: PathBuf,
    run_dir: PathBuf,
}

/// What one round hands to the next.
struct RoundReport {
    verdict: RoundVerdict,
    feedback: Option<String>,
}

impl RoundOrchestrator {
    pub fn new(
        store: Arc<RunStore>,
        executor: Arc<dyn AgentExecutor>,
        descriptor: &RunDescriptor,
        settings: &Settings,
    ) -> Self {
        let gates = Gates::new(store.clone(), settings.poll_interval());
        let runner = AgentTaskRunner::new(
            store.clone(),
            executor,
            gates.clone(),
            descriptor.workspace.clone(),
        );
        Self {
            store,
            runner,
            gates,
            checkpoints: CheckpointStore::for_workspace(
                &descriptor.workspace,
                settings.tracked_paths(),
            ),
            lint: LintRunner::new(settings.lint.command.clone(), settings.lint_timeout()),
            head_chars: settings.context.head_chars,
            tail_chars: settings.context.tail_chars,
            augmenter: None,
            workspace: descriptor.workspace.clone(),
            run_dir: descriptor.run_dir.clone(),
        }
    }

    pub fn with_augmenter(mut self, augmenter: Option<Arc<dyn ResearchAugmenter>>) -> Self {
        self.augmenter = augmenter;
        self
    }

    /// Run rounds until one passes or `max_rounds` is exhausted, then
    /// finish the run. Errors leave the run for the caller to fail.
    pub async fn run(&self) -> Result<(), OrchestratorError> {
        let max_rounds = self.store.get_state().max_rounds;
        let mut feedback: Option<String> = None;

        for round in 1..=max_rounds {
            let report = self.run_round(round, feedback.as_deref()).await?;
            if report.verdict == RoundVerdict::Pass {
                self.store
                    .finish_run(format!("Round {} passed; goal met", round))?;
                return Ok(());
            }
            feedback = report.feedback;
        }

        self.store.finish_run(format!(
            "Stopped after {} round{}; revision still required",
            max_rounds,
            if max_rounds == 1 { "" } else { "s" }
        ))?;
        Ok(())
    }

    fn compress_if(&self, features: &FeatureSet, text: &str) -> String {
        if features.contains(&Feature::ContextCompression) {
            compress(text, self.head_chars, self.tail_chars)
        } else {
            text.to_string()
        }
    }

    async fn turn(
        &self,
        role: Role,
        round: u32,
        variant: Option<EnsembleVariant>,
        prompt: String,
    ) -> Result<TurnOutcome, GateError> {
        self.runner
            .run_turn(TurnRequest {
                role,
                round,
                variant,
                prompt,
                artifact: artifact_path(&self.run_dir, round, role, variant),
            })
            .await
    }

    async fn run_round(
        &self,
        round: u32,
        carried_feedback: Option<&str>,
    ) -> Result<RoundReport, OrchestratorError> {
        self.gates.wait_while_paused("round_start", round).await?;

        let state = self.store.get_state();
        let goal = state.goal.clone();
        let max_rounds = state.max_rounds;
        let features = state.features.clone();
        let enabled = |feature: Feature| features.contains(&feature);

        self.store.set_current_round(round);
        self.store.reset_agents_for_round(round);
        let mut summary = RoundSummary::running(round);
        self.store.upsert_round(summary.clone());
        self.store.append_event(
            NewEvent::new(
                EventKind::RoundStarted,
                format!("Round {} of {} started", round, max_rounds),
            )
            .round(round),
        )?;

        if enabled(Feature::Checkpoints) {
            let checkpoint = self.checkpoints.create(round, &self.workspace)?;
            self.store.upsert_checkpoint(checkpoint.clone());
            self.store.append_event(
                NewEvent::new(
                    EventKind::CheckpointCreated,
                    format!("Checkpoint saved for round {}", round),
                )
                .round(round)
                .metadata(serde_json::json!({ "dir": checkpoint.dir })),
            )?;
        }

        let feedback = carried_feedback.map(|f| self.compress_if(&features, f));

        let mut research = None;
        if enabled(Feature::Research) {
            let augmentation = self.augment(&goal, round).await?;
            let ctx = PromptContext {
                goal: &goal,
                round,
                max_rounds,
                feedback: feedback.as_deref(),
                augmentation: augmentation.as_deref(),
                ..PromptContext::default()
            };
            let outcome = self
                .turn(Role::Research, round, None, build_prompt(Role::Research, &ctx, None))
                .await?;
            if !outcome.failed {
                research = Some(self.compress_if(&features, &outcome.text));
            }
        }

        let tracked = self.checkpoints.tracked();
        let before = collect_fingerprints(&self.workspace, tracked);
        let ctx = PromptContext {
            goal: &goal,
            round,
            max_rounds,
            research: research.as_deref(),
            feedback: feedback.as_deref(),
            ..PromptContext::default()
        };
        let implementer = self
            .turn(
                Role::Implementer,
                round,
                None,
                build_prompt(Role::Implementer, &ctx, None),
            )
            .await?;
        let after = collect_fingerprints(&self.workspace, tracked);
        let changed = diff_fingerprints(&before, &after);
        summary.set_changed_files(&changed);
        tracing::debug!(round, changed = changed.len(), "Implementer turn complete");

        let review_ctx = PromptContext {
            goal: &goal,
            round,
            max_rounds,
            research: research.as_deref(),
            feedback: feedback.as_deref(),
            changed_files: &changed,
            reports: vec![(Role::Implementer, implementer.text.as_str())],
            ..PromptContext::default()
        };
        let skip_audit = enabled(Feature::HeuristicSelector) && changed.is_empty();

        let lint_fut = async {
            if !enabled(Feature::LintLoop) {
                LintResult::skipped(round, "lint loop disabled")
            } else if changed.is_empty() {
                LintResult::skipped(round, "no tracked files changed")
            } else {
                self.lint.run(round, &self.workspace).await
            }
        };
        let audit_fut = async {
            if skip_audit {
                Ok(self.runner.skip_turn(
                    Role::Auditor,
                    round,
                    artifact_path(&self.run_dir, round, Role::Auditor, None),
                    SKIPPED_AUDIT_TEXT,
                    "no tracked files changed",
                ))
            } else {
                self.turn(
                    Role::Auditor,
                    round,
                    None,
                    build_prompt(Role::Auditor, &review_ctx, None),
                )
                .await
            }
        };
        let eval_fut = self.turn(
            Role::Evaluator,
            round,
            None,
            build_prompt(Role::Evaluator, &review_ctx, None),
        );
        let (lint, auditor, evaluator) = tokio::join!(lint_fut, audit_fut, eval_fut);
        let auditor = auditor?;
        let evaluator = evaluator?;

        self.store.upsert_lint_result(lint.clone());
        let lint_event = NewEvent::new(
            EventKind::LintFinished,
            match lint.status {
                LintStatus::Passed => "Lint passed".to_string(),
                LintStatus::Failed => format!("Lint failed: {}", excerpt(&lint.output_excerpt, 1, 160)),
                LintStatus::Skipped => format!("Lint skipped: {}", lint.output_excerpt),
            },
        )
        .round(round)
        .metadata(serde_json::json!({
            "status": lint.status,
            "command": lint.command,
            "exit_code": lint.exit_code,
            "duration_ms": lint.duration_ms,
        }));
        self.store.append_event(if lint.failed() {
            lint_event.warning()
        } else {
            lint_event
        })?;

        let coord_ctx = PromptContext {
            goal: &goal,
            round,
            max_rounds,
            research: research.as_deref(),
            feedback: feedback.as_deref(),
            changed_files: &changed,
            lint: Some(&lint),
            reports: vec![
                (Role::Implementer, implementer.text.as_str()),
                (Role::Auditor, auditor.text.as_str()),
                (Role::Evaluator, evaluator.text.as_str()),
            ],
            ..PromptContext::default()
        };
        let coordinator = if enabled(Feature::EnsembleVoting) {
            self.run_ensemble(round, &coord_ctx).await?
        } else {
            self.turn(
                Role::Coordinator,
                round,
                None,
                build_prompt(Role::Coordinator, &coord_ctx, None),
            )
            .await?
        };

        let (auditor_decision, defects) = if skip_audit {
            (Some(AuditDecision::SkippedNoChanges), DefectCounts::default())
        } else {
            (
                parse_audit_decision(&auditor.text),
                count_defects(&auditor.text),
            )
        };
        let signals = RoundSignals::from_parsed(
            parse_coordinator_status(&coordinator.text),
            parse_evaluator_status(&evaluator.text),
            auditor_decision,
            lint.failed(),
            defects,
        );
        let verdict = derive_verdict(&signals);

        let failed_roles: Vec<Role> = [
            (Role::Implementer, &implementer),
            (Role::Auditor, &auditor),
            (Role::Evaluator, &evaluator),
            (Role::Coordinator, &coordinator),
        ]
        .into_iter()
        .filter(|(_, outcome)| outcome.failed)
        .map(|(role, _)| role)
        .collect();

        summary.verdict = verdict;
        summary.coordinator_status = Some(signals.coordinator);
        summary.evaluator_status = Some(signals.evaluator);
        summary.auditor_decision = Some(signals.auditor);
        summary.lint_passed = match lint.status {
            LintStatus::Passed => Some(true),
            LintStatus::Failed => Some(false),
            LintStatus::Skipped => None,
        };
        summary.auditor_skipped = skip_audit;
        summary.defects = defects;
        summary.notes = round_notes(&coordinator, &auditor, skip_audit, &lint, &failed_roles);
        summary.finished_at = Some(Utc::now());
        self.store.upsert_round(summary.clone());

        let finished = NewEvent::new(
            EventKind::RoundFinished,
            format!("Round {} finished: {}", round, verdict),
        )
        .round(round)
        .metadata(serde_json::json!({
            "verdict": verdict,
            "coordinator": signals.coordinator,
            "evaluator": signals.evaluator,
            "auditor": signals.auditor,
            "changed_files": changed.len(),
        }));
        self.store.append_event(if verdict == RoundVerdict::Fail {
            finished.warning()
        } else {
            finished
        })?;

        if should_auto_rewind(enabled(Feature::Checkpoints), round, &signals) {
            self.auto_rewind(round, &mut summary, enabled(Feature::HumanInLoop))
                .await?;
        }

        Ok(RoundReport {
            verdict,
            feedback: (!evaluator.failed).then_some(evaluator.text),
        })
    }

    /// Three coordinator variants in parallel; the plurality status wins.
    async fn run_ensemble(
        &self,
        round: u32,
        ctx: &PromptContext<'_>,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let turns = EnsembleVariant::ORDER.iter().map(|&variant| {
            self.turn(
                Role::Coordinator,
                round,
                Some(variant),
                build_prompt(Role::Coordinator, ctx, Some(variant)),
            )
        });
        let outcomes = join_all(turns)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let votes: Vec<EnsembleVote> = EnsembleVariant::ORDER
            .iter()
            .zip(&outcomes)
            .map(|(&variant, outcome)| EnsembleVote {
                variant,
                status: parse_coordinator_status(&outcome.text)
                    .unwrap_or(CoordinatorStatus::Revise),
                failed: outcome.failed,
            })
            .collect();
        let result = ensemble::select(round, votes)
            .ok_or_else(|| anyhow::anyhow!("Ensemble produced no votes in round {}", round))?;

        let index = EnsembleVariant::ORDER
            .iter()
            .position(|v| *v == result.selected_variant)
            .unwrap_or(0);
        let mut selected = outcomes[index].clone();
        // The selected status is authoritative even if the winning text is
        // missing its status line.
        if parse_coordinator_status(&selected.text).is_none() {
            selected.text.push_str(&format!("\nSTATUS: {}\n", result.selected_status));
        }

        let metadata = serde_json::to_value(&result).map_err(anyhow::Error::from)?;
        self.store.upsert_ensemble_result(result.clone());
        let tally: Vec<String> = result
            .tally
            .iter()
            .map(|(status, n)| format!("{}={}", status, n))
            .collect();
        self.store.append_event(
            NewEvent::new(
                EventKind::EnsembleFinished,
                format!(
                    "Ensemble selected {} from the {} variant ({})",
                    result.selected_status,
                    result.selected_variant.as_str(),
                    tally.join(", ")
                ),
            )
            .round(round)
            .agent(Role::Coordinator)
            .metadata(metadata),
        )?;

        Ok(selected)
    }

    /// Provider failures are a warning; research goes ahead without them.
    async fn augment(&self, goal: &str, round: u32) -> Result<Option<String>, OrchestratorError> {
        let Some(augmenter) = self.augmenter.as_ref() else {
            return Ok(None);
        };
        match augmenter.augment(goal, round).await {
            Ok(text) => {
                self.store.append_event(
                    NewEvent::new(
                        EventKind::ResearchAugmented,
                        format!("Research augmented ({} chars)", text.chars().count()),
                    )
                    .round(round)
                    .agent(Role::Research),
                )?;
                Ok(Some(text))
            }
            Err(e) => {
                tracing::warn!(round, "Research augmentation failed: {:#}", e);
                self.store.append_event(
                    NewEvent::new(
                        EventKind::ResearchAugmentationFailed,
                        format!("Research augmentation failed: {:#}", e),
                    )
                    .round(round)
                    .agent(Role::Research)
                    .warning(),
                )?;
                Ok(None)
            }
        }
    }

    /// Restore the previous round's checkpoint. A failed restore is only a
    /// warning; the run carries on either way.
    async fn auto_rewind(
        &self,
        round: u32,
        summary: &mut RoundSummary,
        human_in_loop: bool,
    ) -> Result<(), OrchestratorError> {
        let target = round - 1;
        match self.checkpoints.restore(target, &self.workspace) {
            Ok(restored) => {
                summary.rewound = true;
                self.store.upsert_round(summary.clone());
                self.store.append_event(
                    NewEvent::new(
                        EventKind::Rewind,
                        format!(
                            "Rewound workspace to the round {} checkpoint ({} paths restored)",
                            target, restored
                        ),
                    )
                    .round(round)
                    .warning()
                    .metadata(serde_json::json!({
                        "target_round": target,
                        "restored": restored,
                        "automatic": true,
                    })),
                )?;
            }
            Err(e) => {
                tracing::warn!(round, target, "Auto-rewind failed: {}", e);
                self.store.append_event(
                    NewEvent::new(
                        EventKind::Rewind,
                        format!("Auto-rewind to round {} failed: {}", target, e),
                    )
                    .round(round)
                    .warning()
                    .metadata(serde_json::json!({
                        "target_round": target,
                        "automatic": true,
                        "error": e.to_string(),
                    })),
                )?;
            }
        }

        if human_in_loop {
            let reason = format!("Review the auto-rewind after round {}", round);
            if self.store.toggle_pause(true, Some(reason.clone())) {
                self.store
                    .append_event(NewEvent::new(EventKind::RunPaused, reason).round(round))?;
            }
            self.gates.wait_while_paused("auto_rewind", round).await?;
        }
        Ok(())
    }
}

fn round_notes(
    coordinator: &TurnOutcome,
    auditor: &TurnOutcome,
    audit_skipped: bool,
    lint: &LintResult,
    failed_roles: &[Role],
) -> Vec<String> {
    let mut notes: Vec<String> = failed_roles
        .iter()
        .map(|role| format!("{} turn failed", role))
        .collect();
    if audit_skipped {
        notes.push("Auditor skipped: no tracked files changed".to_string());
    } else {
        notes.extend(parse_risks(&auditor.text).into_iter().map(|r| format!("Risk: {}", r)));
    }
    if lint.failed() {
        notes.push(format!("Lint failed: {}", excerpt(&lint.output_excerpt, 1, 160)));
    }
    let summary = excerpt(&coordinator.text, 2, 240);
    if !summary.is_empty() {
        notes.push(format!("Coordinator: {}", summary));
    }
    notes
}
