//! Configuration view and validation commands: `roundtable config`.

use anyhow::Result;
use std::path::Path;

use super::super::ConfigCommands;
use roundtable::config::Settings;

pub fn cmd_config(workspace: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = Settings::config_path(workspace);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Roundtable Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No roundtable.toml found at {}", config_path.display());
                println!("Using defaults. Run 'roundtable config init' to create one.");
            }
            println!();

            // Effective values, env overrides included.
            let settings = Settings::for_workspace(workspace)?;
            print!("{}", settings.to_toml()?);
            println!();
            println!("Effective mode: {}", settings.effective_mode(None));
            if settings.research.api_key.is_some() {
                println!("Research API key: set");
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No roundtable.toml found. Using defaults (valid).");
                return Ok(());
            }

            let settings = Settings::load(&config_path)?;
            settings.check()?;
            let warnings = settings.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("roundtable.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            Settings::default().save(&config_path)?;

            println!("Created roundtable.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [agent] command, args, timeout_secs");
            println!("  - [run] mode, max_rounds, features");
            println!("  - [lint] command to override the package.json lint script");
            println!();
        }
    }

    Ok(())
}
