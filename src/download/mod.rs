//! Batch media downloading with tiered fetch escalation.
//!
//! This module turns a list of asset URLs (plus the page they came from) into
//! files on disk and a summary of what happened to each one.
//!
//! # Features
//!
//! - Bounded worker pool with per-origin request spacing
//! - Direct, cookie-primed and browser-rendered fetch tiers
//! - Linear backoff with jitter, honoring `Retry-After` within a wait budget
//! - Inline `data:image/...` URIs decoded without network access
//! - Size floors that discard placeholder bodies
//! - One outcome per task, aggregated into a [`BatchSummary`]
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use mediafetch_core::download::{BatchOptions, download_batch};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let report = download_batch(
//!     &["https://cdn.example.com/a.jpg"],
//!     "https://example.com/gallery",
//!     Path::new("./out"),
//!     BatchOptions::default(),
//! )
//! .await?;
//! println!("saved {}", report.summary.success_count);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod engine;
mod error;
mod filename;
pub mod rate_limiter;
mod retry;
mod stats;

pub use client::{ClientOptions, HttpClient, RequestMode, SavedFile, is_tls_version_mismatch};
pub use engine::{
    BatchObserver, BatchOptions, DownloadEngine, EngineError, PrimingMode, Task, TaskSource,
    Tier, TierPolicy, dispatch, download_batch,
};
pub use error::DownloadError;
pub use filename::{
    FALLBACK_EXTENSION, InlineImage, batch_file_name, batch_token, classify_extension,
    is_data_uri, parse_data_uri,
};
pub use rate_limiter::{DomainThrottle, StartGate, origin_of, parse_retry_after};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use stats::{
    BatchReport, BatchSummary, DownloadOutcome, ErrorClass, ResultAggregator, TaskResult,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
