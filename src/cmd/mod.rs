//! CLI command implementations.
//!
//! | Module        | Commands handled          |
//! |---------------|---------------------------|
//! | `run`         | `Run`                     |
//! | `checkpoints` | `Rewind`, `Checkpoints`   |
//! | `config`      | `Config`                  |

pub mod checkpoints;
pub mod config;
pub mod run;

pub use checkpoints::{cmd_checkpoints, cmd_rewind};
pub use config::cmd_config;
pub use run::{RunArgs, cmd_run};
