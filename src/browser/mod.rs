//! Browser collaborators: page rendering and in-browser asset fetches.
//!
//! The download engine only sees the [`BrowserFetcher`] trait (used by the
//! browser-rendered tier); the scraper only sees [`PageRenderer`]. Without a
//! headless browser, [`HttpPageRenderer`] renders pages with a plain GET and
//! [`NoopBrowser`] makes the browser tier unavailable. The `chromium` feature
//! adds [`chromium::ChromiumBrowser`], which implements both.

#[cfg(feature = "chromium")]
pub mod chromium;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::download::{DownloadError, HttpClient};

/// Errors from a browser collaborator.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// No browser backend is configured.
    #[error("browser backend not available")]
    Unavailable,

    /// The browser process could not be started.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// Opening or loading the page failed.
    #[error("navigation to {url} failed: {message}")]
    Navigation {
        /// Target URL.
        url: String,
        /// Backend-provided description.
        message: String,
    },

    /// The in-page byte fetch failed or returned unusable data.
    #[error("in-page fetch of {url} failed: {message}")]
    Fetch {
        /// Target URL.
        url: String,
        /// Backend-provided description.
        message: String,
    },

    /// Rendering did not finish within its budget.
    #[error("rendering {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Target URL.
        url: String,
        /// Budget that was exceeded.
        timeout_secs: u64,
    },

    /// Plain HTTP rendering failed.
    #[error(transparent)]
    Http(#[from] DownloadError),
}

/// Renders a page to HTML (after scripts, when the backend runs them).
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Returns the page markup, giving up after `timeout`.
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, BrowserError>;
}

/// Fetches asset bytes from inside a browsing context.
///
/// Used only by the browser-rendered tier; the engine bounds each call with
/// its own render timeout.
#[async_trait]
pub trait BrowserFetcher: Send + Sync {
    /// Navigates to `url` and returns the raw bytes of the asset.
    async fn fetch_via_browser(&self, url: &str) -> Result<Vec<u8>, BrowserError>;
}

/// Page renderer that issues a single GET with the browser header profile.
///
/// Scripts are not executed, so lazily-injected markup is missed.
#[derive(Debug, Clone)]
pub struct HttpPageRenderer {
    client: HttpClient,
}

impl HttpPageRenderer {
    /// Wraps an HTTP client (its cookie jar is reused for the page request).
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    #[instrument(skip(self))]
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, BrowserError> {
        match tokio::time::timeout(timeout, self.client.fetch_page(url)).await {
            Ok(result) => {
                let html = result?;
                debug!(bytes = html.len(), "page fetched over HTTP");
                Ok(html)
            }
            Err(_) => Err(BrowserError::Timeout {
                url: url.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

/// Browser fetcher used when no headless browser is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBrowser;

#[async_trait]
impl BrowserFetcher for NoopBrowser {
    async fn fetch_via_browser(&self, _url: &str) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::Unavailable)
    }
}

#[async_trait]
impl PageRenderer for NoopBrowser {
    async fn render(&self, _url: &str, _timeout: Duration) -> Result<String, BrowserError> {
        Err(BrowserError::Unavailable)
    }
}
