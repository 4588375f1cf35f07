//! Round orchestration.
//!
//! Each round runs: checkpoint, research, implementer, then lint, auditor
//! and evaluator concurrently, then the coordinator (single or ensemble).
//! The verdict decides whether the run stops, continues, or rewinds.

pub mod context;
pub mod ensemble;
pub mod lint;
mod round;
pub mod verdict;

pub use lint::LintRunner;
pub use round::RoundOrchestrator;
pub use verdict::{RoundSignals, derive_verdict, should_auto_rewind};
