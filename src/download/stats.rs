//! Per-task outcomes and the batch result aggregator.
//!
//! Workers record exactly one [`DownloadOutcome`] per task into a shared
//! [`ResultAggregator`]; once the pool drains, the aggregator produces the
//! [`BatchSummary`] returned to the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::warn;

use super::Tier;

/// Why a task failed, derived from the last error it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorClass {
    /// Malformed or non-http(s) URL; never entered the pool.
    #[serde(rename = "InvalidURL")]
    InvalidUrl,
    /// Inline `data:` URI that did not decode.
    InvalidData,
    /// DNS, connection, TLS or timeout failure.
    TransportError,
    /// 4xx other than 403/429.
    #[serde(rename = "HTTPClientError")]
    HttpClientError,
    /// 403 that could not be escalated past.
    #[serde(rename = "HTTPForbidden")]
    HttpForbidden,
    /// 429 after retries (or a `Retry-After` beyond the wait budget).
    #[serde(rename = "HTTPRateLimited")]
    HttpRateLimited,
    /// 5xx after retries.
    #[serde(rename = "HTTPServerError")]
    HttpServerError,
    /// Body below the tier's minimum size on every attempt.
    UndersizedResponse,
    /// Browser delegate exceeded its time budget.
    RenderTimeout,
    /// Browser delegate failed for another reason.
    RenderFailed,
    /// Local filesystem failure.
    WriteError,
    /// The worker running the task panicked.
    Internal,
}

impl ErrorClass {
    /// Name used in summaries and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "InvalidURL",
            Self::InvalidData => "InvalidData",
            Self::TransportError => "TransportError",
            Self::HttpClientError => "HTTPClientError",
            Self::HttpForbidden => "HTTPForbidden",
            Self::HttpRateLimited => "HTTPRateLimited",
            Self::HttpServerError => "HTTPServerError",
            Self::UndersizedResponse => "UndersizedResponse",
            Self::RenderTimeout => "RenderTimeout",
            Self::RenderFailed => "RenderFailed",
            Self::WriteError => "WriteError",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    /// The asset was persisted.
    Success {
        /// Tier that produced the bytes.
        tier: Tier,
        /// Bytes on disk.
        bytes: u64,
        /// Where they were written.
        path: PathBuf,
    },
    /// The task gave up.
    Failed {
        /// Classification of the last error.
        class: ErrorClass,
        /// Human-readable last error.
        message: String,
    },
}

/// The single outcome recorded for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    /// Position of the URL in the batch input.
    pub index: usize,
    /// The URL as supplied.
    pub url: String,
    /// Network attempts made across all tiers.
    pub attempts: u32,
    /// How the task ended.
    pub result: TaskResult,
}

impl DownloadOutcome {
    /// Builds a success outcome.
    #[must_use]
    pub fn success(
        index: usize,
        url: impl Into<String>,
        attempts: u32,
        tier: Tier,
        bytes: u64,
        path: PathBuf,
    ) -> Self {
        Self {
            index,
            url: url.into(),
            attempts,
            result: TaskResult::Success { tier, bytes, path },
        }
    }

    /// Builds a failure outcome.
    #[must_use]
    pub fn failed(
        index: usize,
        url: impl Into<String>,
        attempts: u32,
        class: ErrorClass,
        message: impl Into<String>,
    ) -> Self {
        Self {
            index,
            url: url.into(),
            attempts,
            result: TaskResult::Failed {
                class,
                message: message.into(),
            },
        }
    }

    /// Returns true for a successful task.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.result, TaskResult::Success { .. })
    }

    /// Tier that succeeded, if any.
    #[must_use]
    pub fn tier(&self) -> Option<Tier> {
        match self.result {
            TaskResult::Success { tier, .. } => Some(tier),
            TaskResult::Failed { .. } => None,
        }
    }

    /// Failure classification, if any.
    #[must_use]
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self.result {
            TaskResult::Failed { class, .. } => Some(class),
            TaskResult::Success { .. } => None,
        }
    }
}

/// Counts produced at the end of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Tasks that persisted an asset.
    pub success_count: usize,
    /// Tasks that gave up.
    pub failure_count: usize,
    /// Successes by the tier that produced them.
    pub by_method: BTreeMap<Tier, usize>,
    /// Failures by classification.
    pub by_error_class: BTreeMap<ErrorClass, usize>,
}

impl BatchSummary {
    /// Total tasks accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }
}

/// Summary plus the per-task outcomes, ordered by input index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Aggregate counts.
    pub summary: BatchSummary,
    /// One entry per input URL.
    pub outcomes: Vec<DownloadOutcome>,
}

impl BatchReport {
    /// Builds a report over outcomes already ordered by index.
    #[must_use]
    pub fn from_outcomes(outcomes: Vec<DownloadOutcome>) -> Self {
        Self {
            summary: summarize(outcomes.iter()),
            outcomes,
        }
    }
}

/// Lock-protected accumulator shared by every worker of a batch.
///
/// Outcomes are keyed by task index, so a task can never be counted twice.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    outcomes: Mutex<BTreeMap<usize, DownloadOutcome>>,
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task's terminal outcome.
    ///
    /// Returns false (and keeps the first outcome) if the task already has one.
    pub fn record(&self, outcome: DownloadOutcome) -> bool {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        if outcomes.contains_key(&outcome.index) {
            warn!(index = outcome.index, "duplicate outcome ignored");
            return false;
        }
        outcomes.insert(outcome.index, outcome);
        true
    }

    /// Returns whether the task at `index` has an outcome.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&index)
    }

    /// Number of recorded outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Computes the summary over everything recorded so far.
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        let outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        summarize(outcomes.values())
    }

    /// Copies the recorded outcomes, ordered by index.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DownloadOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Consumes the aggregator into the final report.
    #[must_use]
    pub fn into_report(self) -> BatchReport {
        let outcomes: Vec<DownloadOutcome> = self
            .outcomes
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_values()
            .collect();
        BatchReport::from_outcomes(outcomes)
    }
}

fn summarize<'a>(outcomes: impl Iterator<Item = &'a DownloadOutcome>) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for outcome in outcomes {
        match &outcome.result {
            TaskResult::Success { tier, .. } => {
                summary.success_count += 1;
                *summary.by_method.entry(*tier).or_insert(0) += 1;
            }
            TaskResult::Failed { class, .. } => {
                summary.failure_count += 1;
                *summary.by_error_class.entry(*class).or_insert(0) += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn ok(index: usize, tier: Tier) -> DownloadOutcome {
        DownloadOutcome::success(index, "https://a.example/x.jpg", 1, tier, 20_000, PathBuf::from("x.jpg"))
    }

    fn failed(index: usize, class: ErrorClass) -> DownloadOutcome {
        DownloadOutcome::failed(index, "https://a.example/y.jpg", 3, class, "boom")
    }

    #[test]
    fn test_summary_counts_by_method_and_class() {
        let aggregator = ResultAggregator::new();
        aggregator.record(ok(0, Tier::Direct));
        aggregator.record(ok(1, Tier::Direct));
        aggregator.record(ok(2, Tier::BrowserRendered));
        aggregator.record(failed(3, ErrorClass::HttpForbidden));
        aggregator.record(failed(4, ErrorClass::InvalidUrl));

        let summary = aggregator.summary();
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.failure_count, 2);
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.by_method[&Tier::Direct], 2);
        assert_eq!(summary.by_method[&Tier::BrowserRendered], 1);
        assert!(!summary.by_method.contains_key(&Tier::CookiePrimed));
        assert_eq!(summary.by_error_class[&ErrorClass::HttpForbidden], 1);
        assert_eq!(summary.by_error_class[&ErrorClass::InvalidUrl], 1);
    }

    #[test]
    fn test_duplicate_outcome_is_rejected() {
        let aggregator = ResultAggregator::new();
        assert!(aggregator.record(ok(0, Tier::Direct)));
        assert!(!aggregator.record(failed(0, ErrorClass::WriteError)));

        let report = aggregator.into_report();
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.outcomes[0].is_success());
    }

    #[test]
    fn test_report_is_ordered_by_index() {
        let aggregator = ResultAggregator::new();
        aggregator.record(failed(2, ErrorClass::TransportError));
        aggregator.record(ok(0, Tier::CookiePrimed));
        aggregator.record(ok(1, Tier::Direct));

        let report = aggregator.into_report();
        let indexes: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(report.summary.by_method[&Tier::CookiePrimed], 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let aggregator = Arc::new(ResultAggregator::new());
        let mut handles = Vec::new();
        for worker in 0..10 {
            let aggregator = Arc::clone(&aggregator);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    aggregator.record(ok(worker * 50 + i, Tier::Direct));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(aggregator.len(), 500);
        assert_eq!(aggregator.summary().success_count, 500);
    }

    #[test]
    fn test_summary_serializes_taxonomy_names() {
        let aggregator = ResultAggregator::new();
        aggregator.record(failed(0, ErrorClass::InvalidUrl));
        aggregator.record(failed(1, ErrorClass::HttpRateLimited));
        aggregator.record(ok(2, Tier::BrowserRendered));

        let json = serde_json::to_value(aggregator.summary()).unwrap();
        assert_eq!(json["success_count"], 1);
        assert_eq!(json["by_error_class"]["InvalidURL"], 1);
        assert_eq!(json["by_error_class"]["HTTPRateLimited"], 1);
        assert_eq!(json["by_method"]["BrowserRendered"], 1);
    }

    #[test]
    fn test_error_class_display_matches_serialized_name() {
        for class in [
            ErrorClass::InvalidUrl,
            ErrorClass::HttpClientError,
            ErrorClass::UndersizedResponse,
            ErrorClass::RenderFailed,
        ] {
            let json = serde_json::to_value(class).unwrap();
            assert_eq!(json.as_str().unwrap(), class.to_string());
        }
    }
}
