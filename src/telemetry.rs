//! Tracing initialisation for the roundtable binary.
//!
//! Logs go to stderr so run output on stdout stays clean. An optional log
//! directory adds a non-blocking JSON file sink.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_FILE: &str = "roundtable.log";

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
///
/// Keep the returned guard alive for the life of the process, or buffered
/// file output is lost. Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let (writer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .with(writer.map(|w| fmt::layer().with_ansi(false).with_writer(w).json()))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(writer.map(|w| fmt::layer().with_ansi(false).with_writer(w).json()))
            .try_init()
            .ok();
    }

    Ok(guard)
}

/// Parse a `--log-level` value, accepting any case.
pub fn parse_level(value: &str) -> Result<Level> {
    value
        .parse::<Level>()
        .map_err(|_| anyhow::anyhow!("Invalid log level '{}'. Valid values: error, warn, info, debug, trace", value))
}
