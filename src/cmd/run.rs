//! Run orchestration from the command line: `roundtable run`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;

use roundtable::config::Settings;
use roundtable::controller::RunController;
use roundtable::state::{
    EventKind, ExecutionMode, Feature, RoundVerdict, RunEvent, RunOptions, RunState, RunStore,
    Severity,
};

pub struct RunArgs {
    pub goal: String,
    pub mode: Option<ExecutionMode>,
    pub max_rounds: Option<u32>,
    pub features: Vec<Feature>,
    pub no_config_features: bool,
}

pub async fn cmd_run(workspace: &Path, args: RunArgs) -> Result<()> {
    if !workspace.is_dir() {
        anyhow::bail!("Workspace {} is not a directory", workspace.display());
    }
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("Failed to resolve workspace: {}", workspace.display()))?;

    let settings = Settings::for_workspace(&workspace)?;
    settings.check()?;
    for warning in settings.validate() {
        eprintln!("{} {}", style("warning:").yellow().bold(), warning);
    }

    let mut features = if args.no_config_features {
        Default::default()
    } else {
        settings.feature_set()
    };
    features.extend(args.features.iter().copied());

    let options = RunOptions::new(&workspace, settings.effective_mode(args.mode))
        .with_goal(args.goal)
        .with_max_rounds(args.max_rounds.unwrap_or(settings.run.max_rounds))
        .with_features(features);

    let store = Arc::new(RunStore::new(settings.store_config()));
    let subscription = store.subscribe(|event| println!("{}", render_event(event)));
    let controller = RunController::new(store.clone(), settings);
    let descriptor = controller.start(options)?;
    tracing::debug!(run_dir = %descriptor.run_dir.display(), "Artifacts directory");

    tokio::select! {
        _ = controller.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            if store.run_flags().running {
                store.fail_run("Interrupted by user").ok();
            }
        }
    }
    subscription.unsubscribe();

    let state = store.get_state();
    print_summary(&state, &descriptor.run_dir);

    if state.events_of(EventKind::RunFailed).next().is_some() {
        let reason = state
            .errors
            .last()
            .cloned()
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("Run failed: {}", reason);
    }
    Ok(())
}

fn render_event(event: &RunEvent) -> String {
    let kind = format!("{:<28}", event.kind.as_str());
    let kind = match event.severity {
        Some(Severity::Error) => style(kind).red().bold(),
        Some(Severity::Warning) => style(kind).yellow(),
        _ => style(kind).dim(),
    };
    format!(
        "{} {} {}",
        style(format!("[r{}]", event.round)).cyan(),
        kind,
        event.message
    )
}

fn print_summary(state: &RunState, run_dir: &Path) {
    println!();
    println!("{}", style("Run summary").bold());
    for round in &state.rounds {
        let verdict = match round.verdict {
            RoundVerdict::Pass => style(round.verdict.to_string()).green().bold(),
            RoundVerdict::Fail => style(round.verdict.to_string()).red().bold(),
            _ => style(round.verdict.to_string()).yellow(),
        };
        println!(
            "  Round {}: {} ({} changed file{}{})",
            round.round,
            verdict,
            round.changed_files.len(),
            if round.changed_files.len() == 1 { "" } else { "s" },
            if round.rewound { ", rewound" } else { "" }
        );
        for note in &round.notes {
            println!("    - {}", note);
        }
    }
    if let Some(outcome) = &state.outcome {
        println!("  {}", outcome);
    }
    println!("  Artifacts: {}", run_dir.display());
}
