//! Error types for the download module.
//!
//! This module defines structured errors for every way a single fetch attempt
//! can fail, carrying enough context (URL, path, status) for logging and for
//! classification into an [`ErrorClass`](super::ErrorClass).

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while retrieving or persisting a single asset.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// File system error while persisting an asset.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or not an http(s) URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// An inline `data:` URI did not match `data:image/<fmt>;base64,<payload>`
    /// or its payload was not valid base64.
    #[error("invalid data URI: {reason}")]
    InvalidData {
        /// Why the URI was rejected.
        reason: String,
    },

    /// The persisted body was smaller than the tier's minimum size and was deleted.
    #[error("undersized response from {url}: {actual_bytes} bytes (minimum {min_bytes})")]
    Undersized {
        /// The URL whose body was rejected.
        url: String,
        /// Bytes actually received.
        actual_bytes: u64,
        /// Configured minimum for the tier.
        min_bytes: u64,
    },

    /// The browser delegate exceeded its per-task time budget.
    #[error("browser rendering timed out after {timeout_secs}s for {url}")]
    RenderTimeout {
        /// The URL being rendered.
        url: String,
        /// The budget that was exceeded.
        timeout_secs: u64,
    },

    /// The browser delegate failed for a reason other than a timeout.
    #[error("browser fetch failed for {url}: {message}")]
    Browser {
        /// The URL being fetched.
        url: String,
        /// Delegate-provided failure description.
        message: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid data URI error.
    pub fn invalid_data(reason: impl Into<String>) -> Self {
        Self::InvalidData {
            reason: reason.into(),
        }
    }

    /// Creates an undersized response error.
    pub fn undersized(url: impl Into<String>, actual_bytes: u64, min_bytes: u64) -> Self {
        Self::Undersized {
            url: url.into(),
            actual_bytes,
            min_bytes,
        }
    }

    /// Creates a browser timeout error.
    pub fn render_timeout(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self::RenderTimeout {
            url: url.into(),
            timeout_secs,
        }
    }

    /// Creates a browser failure error.
    pub fn browser(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Browser {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Returns the HTTP status code when this is a status error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for an HTTP 403 response.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// url or path, which the source errors do not carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://example.com/a.jpg");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/a.jpg"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://example.com/a.jpg", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/a.jpg"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_download_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/file_00.jpg"), io_error);
        assert!(error.to_string().contains("/tmp/file_00.jpg"));
    }

    #[test]
    fn test_download_error_undersized_display() {
        let error = DownloadError::undersized("https://example.com/a.jpg", 120, 10_240);
        let msg = error.to_string();
        assert!(msg.contains("120"), "Expected actual size in: {msg}");
        assert!(msg.contains("10240"), "Expected minimum in: {msg}");
    }

    #[test]
    fn test_download_error_status_accessors() {
        let forbidden = DownloadError::http_status("https://example.com/a.jpg", 403);
        assert_eq!(forbidden.status(), Some(403));
        assert!(forbidden.is_forbidden());

        let timeout = DownloadError::timeout("https://example.com/a.jpg");
        assert_eq!(timeout.status(), None);
        assert!(!timeout.is_forbidden());
    }

    #[test]
    fn test_download_error_render_timeout_display() {
        let error = DownloadError::render_timeout("https://example.com/a.jpg", 50);
        assert!(error.to_string().contains("50s"));
    }
}
