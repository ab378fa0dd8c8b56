//! End-of-run reporting: human summary on stderr, JSON on stdout.

use std::fmt::Write as _;
use std::path::Path;

use mediafetch_core::download::TaskResult;
use mediafetch_core::{BatchReport, BatchSummary, DownloadOutcome};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    page_url: &'a str,
    output_dir: &'a Path,
    assets: &'a [String],
    summary: &'a BatchSummary,
    outcomes: &'a [DownloadOutcome],
}

/// Serializes the run result as a single JSON document.
pub(crate) fn render_json(
    page_url: &str,
    output_dir: &Path,
    assets: &[String],
    report: &BatchReport,
) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        page_url,
        output_dir,
        assets,
        summary: &report.summary,
        outcomes: &report.outcomes,
    })
}

/// Multi-line summary: counts, successes per tier, failures per class and
/// the failed URLs.
pub(crate) fn render_summary(report: &BatchReport, output_dir: &Path) -> String {
    let summary = &report.summary;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Downloaded {} of {} assets into {}",
        summary.success_count,
        summary.total(),
        output_dir.display()
    );
    for (tier, count) in &summary.by_method {
        let _ = writeln!(out, "  {tier}: {count}");
    }
    if summary.failure_count > 0 {
        let _ = writeln!(out, "Failed: {}", summary.failure_count);
        for (class, count) in &summary.by_error_class {
            let _ = writeln!(out, "  {class}: {count}");
        }
        for outcome in &report.outcomes {
            if let TaskResult::Failed { class, message } = &outcome.result {
                let _ = writeln!(out, "  [{}] {} ({class}): {message}", outcome.index, outcome.url);
            }
        }
    }
    out
}
