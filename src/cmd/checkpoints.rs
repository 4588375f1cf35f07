//! Checkpoint inspection and rewind: `roundtable checkpoints` and
//! `roundtable rewind`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use roundtable::checkpoint::CheckpointStore;
use roundtable::config::Settings;

fn checkpoint_store(workspace: &Path) -> Result<CheckpointStore> {
    let settings = Settings::for_workspace(workspace)?;
    settings.check()?;
    Ok(CheckpointStore::for_workspace(workspace, settings.tracked_paths()))
}

pub fn cmd_checkpoints(workspace: &Path) -> Result<()> {
    let store = checkpoint_store(workspace)?;
    let checkpoints = store.list().context("Failed to list checkpoints")?;

    if checkpoints.is_empty() {
        println!("No checkpoints under {}", store.root().display());
        return Ok(());
    }

    println!("{}", style("Checkpoints").bold());
    for checkpoint in checkpoints {
        if checkpoint.restorable {
            println!(
                "  round {:<3} {}  {}",
                checkpoint.round,
                checkpoint.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                style(checkpoint.dir.display()).dim()
            );
        } else {
            println!(
                "  round {:<3} {}",
                checkpoint.round,
                style("missing manifest, not restorable").red()
            );
        }
    }
    Ok(())
}

pub fn cmd_rewind(workspace: &Path, round: u32) -> Result<()> {
    let store = checkpoint_store(workspace)?;
    let restored = store
        .restore(round, workspace)
        .with_context(|| format!("Failed to rewind to round {}", round))?;
    tracing::info!(round, restored, "Workspace rewound");
    println!(
        "{} workspace to the round {} checkpoint ({} path{} restored)",
        style("Rewound").green().bold(),
        round,
        restored,
        if restored == 1 { "" } else { "s" }
    );
    Ok(())
}
