//! Batch download engine: dispatch, worker pool, escalation and aggregation.
//!
//! A batch is a list of asset URLs plus the page they were found on. Every URL
//! becomes a [`Task`] keyed by its input position; malformed URLs are rejected
//! up front, inline `data:` URIs are decoded locally, and remote URLs run
//! through the tier escalation (direct, cookie-primed, browser-rendered) under
//! a per-origin throttle.
//!
//! # Concurrency Model
//!
//! - A semaphore bounds in-flight tasks to [`BatchOptions::workers`]
//! - Each task runs in its own Tokio task holding an owned permit (RAII)
//! - Requests to one origin are spaced by the throttle interval; origins
//!   proceed independently
//! - Outcomes land in a [`ResultAggregator`] keyed by task index, so each task
//!   is counted exactly once
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use mediafetch_core::download::{BatchOptions, DownloadEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(BatchOptions::default())?;
//! let urls = ["https://cdn.example.com/a.jpg", "https://cdn.example.com/b.png"];
//! let report = engine
//!     .download_batch(&urls, "https://example.com/gallery", Path::new("./out"))
//!     .await?;
//! println!("{} saved, {} failed", report.summary.success_count, report.summary.failure_count);
//! # Ok(())
//! # }
//! ```

mod error_mapping;
mod escalation;
mod persistence;
mod task;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::cookie::Jar;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, instrument, warn};

pub use escalation::{PrimingMode, Tier, TierPolicy};

use task::process_task;

use super::client::ClientOptions;
use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_THROTTLE_INTERVAL, DEFAULT_WORKERS, MAX_WORKERS,
    RENDER_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS,
};
use super::filename::{batch_file_name, batch_token, is_data_uri};
use super::rate_limiter::{DomainThrottle, StartGate, origin_of};
use super::stats::{BatchReport, DownloadOutcome, ErrorClass, ResultAggregator};
use super::{DownloadError, HttpClient};
use crate::browser::BrowserFetcher;
use crate::user_agent::UserAgentPool;

/// Minimum allowed worker count.
const MIN_WORKERS: usize = 1;

/// Error type for batch-level failures.
///
/// Individual task failures never surface here; they are reported in the
/// [`BatchReport`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid worker count provided.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Another option is out of range.
    #[error("invalid batch option: {reason}")]
    InvalidOption {
        /// What is wrong with it.
        reason: String,
    },

    /// The output directory could not be created.
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        /// Requested directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Tunables for a batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum tasks in flight (1..=100).
    pub workers: usize,
    /// Minimum spacing between requests to one origin.
    pub throttle_interval: Duration,
    /// Minimum spacing between any two task starts; zero disables it.
    pub start_interval: Duration,
    /// Budget for the direct and cookie-primed tiers.
    pub http_tier: TierPolicy,
    /// Budget for the browser-rendered tier.
    pub browser_tier: TierPolicy,
    /// Size floor for decoded inline images.
    pub inline_min_file_size: u64,
    /// Whether a persistent 403 may escalate to the browser tier.
    pub escalation_enabled: bool,
    /// When the cookie-primed tier is used.
    pub priming: PrimingMode,
    /// Escalate on the first 403 once no cheaper tier remains, instead of
    /// after the tier's retries.
    pub escalate_on_first_forbidden: bool,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Budget for one browser fetch.
    pub render_timeout: Duration,
    /// User-Agent strings rotated across requests.
    pub user_agents: UserAgentPool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            start_interval: Duration::ZERO,
            http_tier: TierPolicy::http_default(),
            browser_tier: TierPolicy::browser_default(),
            inline_min_file_size: 0,
            escalation_enabled: true,
            priming: PrimingMode::default(),
            escalate_on_first_forbidden: false,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            render_timeout: Duration::from_secs(RENDER_TIMEOUT_SECS),
            user_agents: UserAgentPool::default(),
        }
    }
}

impl BatchOptions {
    /// Checks ranges that would make a batch meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWorkers`] for a worker count outside
    /// 1..=100 and [`EngineError::InvalidOption`] for a zero attempt budget or
    /// timeout.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(EngineError::InvalidWorkers {
                value: self.workers,
            });
        }
        if self.http_tier.max_attempts == 0 {
            return Err(invalid_option("http tier needs at least one attempt"));
        }
        if self.browser_tier.max_attempts == 0 {
            return Err(invalid_option("browser tier needs at least one attempt"));
        }
        if self.request_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(invalid_option("request and connect timeouts must be positive"));
        }
        if self.render_timeout.is_zero() {
            return Err(invalid_option("render timeout must be positive"));
        }
        Ok(())
    }

    /// HTTP client settings derived from these options.
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            user_agents: self.user_agents.clone(),
        }
    }
}

fn invalid_option(reason: &str) -> EngineError {
    EngineError::InvalidOption {
        reason: reason.to_string(),
    }
}

/// How a task obtains its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSource {
    /// Network fetch, throttled under `origin`.
    Remote {
        /// Scheme, host and port of the URL.
        origin: String,
    },
    /// Inline `data:` URI decoded locally.
    Inline,
}

/// One URL of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Position in the batch input; also the file name index.
    pub index: usize,
    /// The URL (whitespace-trimmed).
    pub url: String,
    /// Network or inline.
    pub source: TaskSource,
}

/// Turns batch input into tasks, rejecting what can never be fetched.
///
/// Returns the runnable tasks and a failed outcome (0 attempts, `InvalidURL`)
/// for each rejected entry. Indices follow input positions in both lists.
///
/// ```
/// use mediafetch_core::download::{TaskSource, dispatch};
///
/// let (tasks, rejected) = dispatch(&["https://a.example/x.jpg", "ftp://b/y", "data:image/png;base64,AA=="]);
/// assert_eq!(tasks.len(), 2);
/// assert_eq!(tasks[1].index, 2);
/// assert_eq!(tasks[1].source, TaskSource::Inline);
/// assert_eq!(rejected[0].index, 1);
/// ```
pub fn dispatch<S: AsRef<str>>(urls: &[S]) -> (Vec<Task>, Vec<DownloadOutcome>) {
    let mut tasks = Vec::with_capacity(urls.len());
    let mut rejected = Vec::new();

    for (index, raw) in urls.iter().enumerate() {
        let url = raw.as_ref().trim();
        let source = if is_data_uri(url) {
            Some(TaskSource::Inline)
        } else {
            origin_of(url).map(|origin| TaskSource::Remote { origin })
        };

        match source {
            Some(source) => tasks.push(Task {
                index,
                url: url.to_string(),
                source,
            }),
            None => {
                debug!(index, url, "rejecting URL before dispatch");
                let error = DownloadError::invalid_url(url);
                rejected.push(DownloadOutcome::failed(
                    index,
                    url,
                    0,
                    ErrorClass::InvalidUrl,
                    error.to_string(),
                ));
            }
        }
    }

    (tasks, rejected)
}

/// Receives progress notifications from a running batch.
///
/// Called from worker tasks; implementations must be cheap and thread-safe.
pub trait BatchObserver: Send + Sync {
    /// The batch has `total` entries, rejected ones included.
    fn batch_started(&self, _total: usize) {}

    /// A worker picked up `task`.
    fn task_started(&self, _task: &Task) {}

    /// A task (or a rejected entry) reached its outcome.
    fn task_finished(&self, _outcome: &DownloadOutcome) {}
}

/// State shared by every task of one batch.
struct BatchContext {
    options: BatchOptions,
    client: HttpClient,
    browser: Option<Arc<dyn BrowserFetcher>>,
    throttle: DomainThrottle,
    start_gate: StartGate,
    primed: DashMap<String, Arc<OnceCell<()>>>,
    page_url: String,
    output_dir: PathBuf,
    token: String,
}

impl BatchContext {
    fn output_path(&self, index: usize, extension: &str) -> PathBuf {
        self.output_dir
            .join(batch_file_name(&self.token, index, extension))
    }
}

/// Concurrent batch downloader.
///
/// One engine can run several batches; each batch gets its own throttle,
/// priming state and file token, while the HTTP client (and its cookie jar)
/// and the worker semaphore are shared.
pub struct DownloadEngine {
    options: BatchOptions,
    client: HttpClient,
    semaphore: Arc<Semaphore>,
    browser: Option<Arc<dyn BrowserFetcher>>,
    observer: Option<Arc<dyn BatchObserver>>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("options", &self.options)
            .field("client", &self.client)
            .field("has_browser", &self.browser.is_some())
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine with an empty cookie jar.
    ///
    /// # Errors
    ///
    /// Returns an error if the options fail [`BatchOptions::validate`] or the
    /// HTTP client cannot be built.
    ///
    /// # Example
    ///
    /// ```
    /// use mediafetch_core::download::{BatchOptions, DownloadEngine};
    ///
    /// let engine = DownloadEngine::new(BatchOptions::default()).unwrap();
    /// assert_eq!(engine.workers(), 5);
    /// ```
    pub fn new(options: BatchOptions) -> Result<Self, EngineError> {
        Self::with_cookie_jar(options, Arc::new(Jar::default()))
    }

    /// Creates an engine whose cookie-primed requests use `jar`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    #[instrument(level = "debug", skip(options, jar))]
    pub fn with_cookie_jar(options: BatchOptions, jar: Arc<Jar>) -> Result<Self, EngineError> {
        options.validate()?;
        let client = HttpClient::new(options.client_options(), jar)?;

        debug!(
            workers = options.workers,
            throttle_ms = options.throttle_interval.as_millis(),
            http_attempts = options.http_tier.max_attempts,
            browser_attempts = options.browser_tier.max_attempts,
            priming = ?options.priming,
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(options.workers)),
            options,
            client,
            browser: None,
            observer: None,
        })
    }

    /// Enables the browser-rendered tier.
    #[must_use]
    pub fn with_browser(mut self, browser: Arc<dyn BrowserFetcher>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Attaches a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.options.workers
    }

    /// Returns the batch options.
    #[must_use]
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Returns the HTTP client (and through it the cookie jar).
    #[must_use]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Downloads every URL of a batch into `output_dir`.
    ///
    /// `page_url` is the page the assets were found on; it is sent as the
    /// `Referer` and primed for cookies. Files are named
    /// `file_<token>_<index><ext>` with one random token per batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::OutputDir`] if the directory cannot be created
    /// and [`EngineError::SemaphoreClosed`] if the worker pool shuts down.
    /// Individual task failures do NOT cause this method to error.
    #[instrument(skip(self, urls), fields(count = urls.len(), output_dir = %output_dir.display()))]
    pub async fn download_batch<S: AsRef<str>>(
        &self,
        urls: &[S],
        page_url: &str,
        output_dir: &Path,
    ) -> Result<BatchReport, EngineError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| EngineError::OutputDir {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let (tasks, rejected) = dispatch(urls);
        let aggregator = Arc::new(ResultAggregator::new());
        if let Some(observer) = &self.observer {
            observer.batch_started(urls.len());
        }
        for outcome in rejected {
            if let Some(observer) = &self.observer {
                observer.task_finished(&outcome);
            }
            aggregator.record(outcome);
        }

        let ctx = Arc::new(BatchContext {
            options: self.options.clone(),
            client: self.client.clone(),
            browser: self.browser.clone(),
            throttle: DomainThrottle::new(self.options.throttle_interval),
            start_gate: StartGate::new(self.options.start_interval),
            primed: DashMap::new(),
            page_url: page_url.trim().to_string(),
            output_dir: output_dir.to_path_buf(),
            token: batch_token(),
        });

        info!(
            tasks = tasks.len(),
            rejected = aggregator.len(),
            token = %ctx.token,
            "starting batch"
        );

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            // Blocks while `workers` tasks are in flight
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;
            ctx.start_gate.wait().await;

            let ctx = Arc::clone(&ctx);
            let aggregator = Arc::clone(&aggregator);
            let observer = self.observer.clone();
            let index = task.index;
            let url = task.url.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                if let Some(observer) = &observer {
                    observer.task_started(&task);
                }
                let outcome = process_task(&ctx, &task).await;
                if let Some(observer) = &observer {
                    observer.task_finished(&outcome);
                }
                aggregator.record(outcome);
            });
            handles.push((index, url, handle));
        }

        debug!(task_count = handles.len(), "waiting for tasks to complete");

        for (index, url, handle) in handles {
            let Err(error) = handle.await else {
                continue;
            };
            warn!(index, error = %error, "download task panicked");
            if !aggregator.contains(index) {
                let outcome = DownloadOutcome::failed(
                    index,
                    url,
                    0,
                    ErrorClass::Internal,
                    format!("worker task failed: {error}"),
                );
                if let Some(observer) = &self.observer {
                    observer.task_finished(&outcome);
                }
                aggregator.record(outcome);
            }
        }

        // All workers have joined, so the aggregator is normally unshared.
        let report = match Arc::try_unwrap(aggregator) {
            Ok(aggregator) => aggregator.into_report(),
            Err(shared) => BatchReport::from_outcomes(shared.snapshot()),
        };

        info!(
            succeeded = report.summary.success_count,
            failed = report.summary.failure_count,
            total = report.summary.total(),
            "batch complete"
        );
        Ok(report)
    }
}

/// One-shot batch with a fresh engine and no browser tier.
///
/// # Errors
///
/// Same as [`DownloadEngine::new`] and [`DownloadEngine::download_batch`].
pub async fn download_batch<S: AsRef<str>>(
    urls: &[S],
    page_url: &str,
    output_dir: &Path,
    options: BatchOptions,
) -> Result<BatchReport, EngineError> {
    DownloadEngine::new(options)?
        .download_batch(urls, page_url, output_dir)
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_new_valid_workers() {
        for workers in [1, 5, 100] {
            let options = BatchOptions {
                workers,
                ..BatchOptions::default()
            };
            let engine = DownloadEngine::new(options).unwrap();
            assert_eq!(engine.workers(), workers);
        }
    }

    #[test]
    fn test_engine_new_invalid_workers() {
        for workers in [0, 101] {
            let options = BatchOptions {
                workers,
                ..BatchOptions::default()
            };
            let result = DownloadEngine::new(options);
            assert!(matches!(
                result,
                Err(EngineError::InvalidWorkers { value }) if value == workers
            ));
        }
    }

    #[test]
    fn test_options_reject_zero_attempts() {
        let mut options = BatchOptions::default();
        options.http_tier.max_attempts = 0;
        assert!(matches!(
            options.validate(),
            Err(EngineError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_engine_error_display() {
        let msg = EngineError::InvalidWorkers { value: 0 }.to_string();
        assert!(msg.contains("invalid worker count"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_dispatch_keeps_input_positions() {
        let urls = vec![
            "https://a.example/1.jpg".to_string(),
            "not a url".to_string(),
            "  https://b.example/2.png  ".to_string(),
            "javascript:alert(1)".to_string(),
            "data:image/gif;base64,R0lGODlh".to_string(),
            String::new(),
        ];
        let (tasks, rejected) = dispatch(&urls);

        let task_indices: Vec<usize> = tasks.iter().map(|t| t.index).collect();
        assert_eq!(task_indices, vec![0, 2, 4]);
        assert_eq!(tasks[1].url, "https://b.example/2.png");
        assert_eq!(
            tasks[1].source,
            TaskSource::Remote {
                origin: "https://b.example".to_string()
            }
        );
        assert_eq!(tasks[2].source, TaskSource::Inline);

        let rejected_indices: Vec<usize> = rejected.iter().map(|o| o.index).collect();
        assert_eq!(rejected_indices, vec![1, 3, 5]);
        assert!(rejected.iter().all(|o| o.attempts == 0));
        assert!(
            rejected
                .iter()
                .all(|o| o.error_class() == Some(ErrorClass::InvalidUrl))
        );
    }

    #[tokio::test]
    async fn test_empty_batch_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(BatchOptions::default()).unwrap();
        let urls: [&str; 0] = [];

        let report = engine
            .download_batch(&urls, "https://example.com/", dir.path())
            .await
            .unwrap();
        assert_eq!(report.summary.total(), 0);
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_output_dir_failure_is_batch_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let engine = DownloadEngine::new(BatchOptions::default()).unwrap();
        let result = engine
            .download_batch(&["https://a.example/x.jpg"], "", &blocker.join("sub"))
            .await;
        assert!(matches!(result, Err(EngineError::OutputDir { .. })));
    }

    #[test]
    fn test_output_path_uses_batch_token() {
        let ctx = BatchContext {
            options: BatchOptions::default(),
            client: HttpClient::new(ClientOptions::default(), Arc::new(Jar::default())).unwrap(),
            browser: None,
            throttle: DomainThrottle::new(Duration::ZERO),
            start_gate: StartGate::new(Duration::ZERO),
            primed: DashMap::new(),
            page_url: String::new(),
            output_dir: PathBuf::from("/out"),
            token: "deadbeef".to_string(),
        };
        assert_eq!(
            ctx.output_path(12, ".webp"),
            PathBuf::from("/out/file_deadbeef_012.webp")
        );
    }
}
