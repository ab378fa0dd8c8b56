//! Mediafetch Core Library
//!
//! Retrieves the images and videos referenced by a web page. A batch of asset
//! URLs is fetched concurrently under a per-origin throttle; each asset starts
//! with a plain request and escalates through cookie priming to a headless
//! browser only when the origin keeps refusing it.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Batch engine, fetch tiers, retry and throttling
//! - [`browser`] - Page rendering and in-browser fetch collaborators
//! - [`extract`] - Asset URL extraction from page markup
//! - [`scrape`] - Render, extract and download a whole page
//! - [`auth`] - Cookie seed files for the cookie-primed tier
//! - [`config`] - File configuration for batch defaults
//! - [`user_agent`] - User-Agent rotation pool

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod browser;
pub mod config;
pub mod download;
pub mod extract;
pub mod scrape;
pub mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use download::{
    BatchObserver, BatchOptions, BatchReport, BatchSummary, DEFAULT_MAX_RETRIES, DownloadEngine,
    DownloadError, DownloadOutcome, EngineError, ErrorClass, HttpClient, PrimingMode, Tier,
    download_batch,
};
pub use extract::{AssetExtractor, HtmlAssetExtractor, MediaKind};
pub use scrape::{ScrapeError, ScrapeReport, Scraper};
