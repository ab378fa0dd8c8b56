//! CLI entry point for the mediafetch tool.

use std::process::ExitCode;

use mediafetch_core::BatchSummary;

mod app;
mod cli;

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every task succeeded (or there were none).
    Success,
    /// Some tasks failed, at least one succeeded.
    Partial,
    /// Nothing succeeded, or the run could not start.
    Failure,
}

impl ProcessExit {
    /// Any failure makes the run partial; no success at all makes it a failure.
    /// An empty batch counts as success.
    fn from_summary(summary: &BatchSummary) -> Self {
        match (summary.success_count, summary.failure_count) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failure,
            _ => Self::Partial,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Partial => 1,
            Self::Failure => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_mediafetch().await {
        Ok(outcome) => ExitCode::from(outcome.code()),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}
