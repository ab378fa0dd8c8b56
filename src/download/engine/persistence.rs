use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::DownloadError;
use crate::download::client::write_response;

/// A body that reached disk and passed the size floor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Persisted {
    pub(super) path: PathBuf,
    pub(super) bytes: u64,
}

/// Streams a response to `path`, then enforces the size floor.
pub(super) async fn persist_response(
    response: reqwest::Response,
    url: &str,
    path: &Path,
    min_size: u64,
) -> Result<Persisted, DownloadError> {
    let bytes = write_response(response, url, path).await?;
    validate_size(url, path, bytes, min_size).await
}

/// Writes an in-memory body to `path`, then enforces the size floor.
pub(super) async fn persist_bytes(
    body: &[u8],
    path: &Path,
    url: &str,
    min_size: u64,
) -> Result<Persisted, DownloadError> {
    let written = tokio::fs::write(path, body).await;
    discard_on_error(path, written).await?;
    validate_size(url, path, body.len() as u64, min_size).await
}

/// A failed write may leave a partial file behind; remove it.
async fn discard_on_error(path: &Path, written: std::io::Result<()>) -> Result<(), DownloadError> {
    let Err(error) = written else {
        return Ok(());
    };
    debug!(path = %path.display(), "cleaning up partial file after error");
    let _ = tokio::fs::remove_file(path).await;
    Err(DownloadError::io(path, error))
}

/// Files below `min_size` are removed before the error is returned.
async fn validate_size(
    url: &str,
    path: &Path,
    bytes: u64,
    min_size: u64,
) -> Result<Persisted, DownloadError> {
    if bytes >= min_size {
        debug!(path = %path.display(), bytes, "body persisted");
        return Ok(Persisted {
            path: path.to_path_buf(),
            bytes,
        });
    }

    if let Err(error) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %error, "failed to remove undersized file");
    }
    debug!(url, bytes, min_size, "undersized body discarded");
    Err(DownloadError::undersized(url, bytes, min_size))
}
