//! HTTP client wrapper for fetching media assets.
//!
//! This module provides the `HttpClient` struct which sends requests with a
//! realistic browser header profile, keeps a cookie jar shared by the
//! cookie-primed tier, and streams bodies to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, RETRY_AFTER, USER_AGENT};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::error::DownloadError;
use super::filename::{classify_extension, filename_from_url, resolve_unique_path};
use crate::user_agent::UserAgentPool;

/// Accept header for image/video asset requests.
const ASSET_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

/// Accept header for page requests (priming, rendering).
const PAGE_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.9";

/// Error text fragments that identify a TLS protocol-version mismatch.
const TLS_MISMATCH_PATTERNS: &[&str] = &[
    "http response to https",
    "wrong version number",
    "protocol version",
    "invalidcontenttype",
    "corrupt message",
];

/// Timeouts and header pool for an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout, including the body.
    pub request_timeout: Duration,
    /// User-Agent strings rotated per request.
    pub user_agents: UserAgentPool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            user_agents: UserAgentPool::default(),
        }
    }
}

/// How a single asset request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestMode {
    /// Send and store cookies through the shared jar.
    pub with_cookies: bool,
    /// Skip certificate validation (protocol-mismatch recovery only).
    pub relaxed_tls: bool,
}

/// A file saved by [`HttpClient::download_one`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    /// Where the body was written.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
}

/// HTTP client for asset fetching with streaming support.
///
/// Holds two connection pools: one without cookies for the direct tier and one
/// bound to the batch cookie jar for priming and primed requests. Clients that
/// skip certificate validation are only built the first time a protocol
/// mismatch is seen.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use mediafetch_core::download::{ClientOptions, HttpClient};
/// use reqwest::cookie::Jar;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new(ClientOptions::default(), Arc::new(Jar::default()))?;
/// let saved = client
///     .download_one("https://example.com/photo.jpg", "https://example.com/", Path::new("./out"))
///     .await?;
/// println!("Saved {} bytes to {}", saved.bytes, saved.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    plain: Client,
    primed: Client,
    jar: Arc<Jar>,
    options: ClientOptions,
    relaxed: Arc<OnceCell<RelaxedClients>>,
}

#[derive(Debug)]
struct RelaxedClients {
    plain: Client,
    primed: Client,
}

impl HttpClient {
    /// Creates a client sharing `jar` with every cookie-primed request.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if reqwest cannot build a client (TLS
    /// backend initialization failure).
    pub fn new(options: ClientOptions, jar: Arc<Jar>) -> Result<Self, reqwest::Error> {
        let plain = build_client(&options, None, false)?;
        let primed = build_client(&options, Some(Arc::clone(&jar)), false)?;
        Ok(Self {
            plain,
            primed,
            jar,
            options,
            relaxed: Arc::new(OnceCell::new()),
        })
    }

    /// Returns the cookie jar shared by primed requests.
    #[must_use]
    pub fn cookie_jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Returns the User-Agent pool.
    #[must_use]
    pub fn user_agents(&self) -> &UserAgentPool {
        &self.options.user_agents
    }

    async fn client_for(&self, url: &str, mode: RequestMode) -> Result<Client, DownloadError> {
        if !mode.relaxed_tls {
            return Ok(if mode.with_cookies {
                self.primed.clone()
            } else {
                self.plain.clone()
            });
        }

        let relaxed = self
            .relaxed
            .get_or_try_init(|| async {
                debug!("building relaxed-TLS clients");
                Ok::<_, reqwest::Error>(RelaxedClients {
                    plain: build_client(&self.options, None, true)?,
                    primed: build_client(&self.options, Some(Arc::clone(&self.jar)), true)?,
                })
            })
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        Ok(if mode.with_cookies {
            relaxed.primed.clone()
        } else {
            relaxed.plain.clone()
        })
    }

    /// Sends an asset GET with the image-fetch header profile.
    ///
    /// Any 2xx/3xx final status is returned as `Ok`; other statuses become
    /// [`DownloadError::HttpStatus`] carrying the `Retry-After` value.
    ///
    /// # Errors
    ///
    /// Transport failures map to [`DownloadError::Timeout`] or
    /// [`DownloadError::Network`]; error statuses to [`DownloadError::HttpStatus`].
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_asset(
        &self,
        url: &str,
        referer: &str,
        mode: RequestMode,
    ) -> Result<reqwest::Response, DownloadError> {
        let client = self.client_for(url, mode).await?;
        let mut request = client
            .get(url)
            .header(USER_AGENT, self.options.user_agents.pick())
            .header(ACCEPT, ASSET_ACCEPT)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .header("Sec-Fetch-Dest", "image")
            .header("Sec-Fetch-Mode", "no-cors")
            .header("Sec-Fetch-Site", "same-origin");
        if !referer.is_empty() {
            request = request.header(REFERER, referer);
        }

        send_checked(request, url).await
    }

    /// Best-effort GET of the referring page so the jar picks up session cookies.
    ///
    /// Returns whether the request completed; errors are logged and ignored.
    #[instrument(skip(self))]
    pub async fn prime(&self, page_url: &str) -> bool {
        let result = self
            .primed
            .get(page_url)
            .header(USER_AGENT, self.options.user_agents.pick())
            .header(ACCEPT, PAGE_ACCEPT)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .send()
            .await;
        match result {
            Ok(response) => {
                debug!(status = response.status().as_u16(), "cookie priming request completed");
                true
            }
            Err(error) => {
                debug!(error = %error, "cookie priming request failed, continuing");
                false
            }
        }
    }

    /// Fetches a page body as text, sending cookies from the shared jar.
    ///
    /// # Errors
    ///
    /// Same mapping as [`fetch_asset`](Self::fetch_asset); body decoding
    /// failures are reported as [`DownloadError::Network`].
    #[instrument(skip(self))]
    pub async fn fetch_page(&self, url: &str) -> Result<String, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let request = self
            .primed
            .get(url)
            .header(USER_AGENT, self.options.user_agents.pick())
            .header(ACCEPT, PAGE_ACCEPT)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE);
        let response = send_checked(request, url).await?;
        response.text().await.map_err(|e| DownloadError::network(url, e))
    }

    /// Saves one asset under a name derived from its URL path.
    ///
    /// Single request, no escalation. An existing file with the same name gets
    /// a `_1` (then `_2`, ...) suffix instead of being overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for non-http(s) URLs, otherwise the
    /// request or IO error. No partial file is left behind on failure.
    #[instrument(skip(self, output_dir), fields(url = %url))]
    pub async fn download_one(
        &self,
        url: &str,
        referer: &str,
        output_dir: &Path,
    ) -> Result<SavedFile, DownloadError> {
        let parsed = Url::parse(url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| DownloadError::invalid_url(url))?;

        let response = self
            .fetch_asset(
                url,
                referer,
                RequestMode {
                    with_cookies: true,
                    relaxed_tls: false,
                },
            )
            .await?;

        let mut name = filename_from_url(&parsed);
        if !Path::new(&name).extension().is_some_and(|e| !e.is_empty()) {
            name.push_str(&classify_extension(url, content_type(&response).as_deref()));
        }
        let path = resolve_unique_path(output_dir, &name);

        let bytes = write_response(response, url, &path).await?;
        info!(path = %path.display(), bytes, "asset saved");
        Ok(SavedFile { path, bytes })
    }
}

/// Returns the response's declared content type, if any.
pub(crate) fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

async fn send_checked(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<reqwest::Response, DownloadError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            DownloadError::timeout(url)
        } else {
            DownloadError::network(url, e)
        }
    })?;

    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    Err(DownloadError::http_status_with_retry_after(
        url,
        status.as_u16(),
        retry_after,
    ))
}

/// Streams a response body into a new file at `path`.
///
/// The partial file is removed if streaming fails.
pub(crate) async fn write_response(
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let mut file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    let result = stream_to_file(&mut file, response, url, path).await;
    if result.is_err() {
        debug!(path = %path.display(), "cleaning up partial file after error");
        drop(file);
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}

async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}

fn build_client(
    options: &ClientOptions,
    cookie_jar: Option<Arc<Jar>>,
    relaxed_tls: bool,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(options.connect_timeout)
        .timeout(options.request_timeout)
        .gzip(true);
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }
    if relaxed_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build()
}

/// Returns true when a transport error looks like a TLS protocol-version
/// mismatch (e.g. an HTTPS request answered by a plain HTTP server).
#[must_use]
pub fn is_tls_version_mismatch(error: &DownloadError) -> bool {
    let DownloadError::Network { source, .. } = error else {
        return false;
    };

    let mut text = format!("{source:?}").to_lowercase();
    let mut current: Option<&(dyn std::error::Error + 'static)> =
        Some(source as &(dyn std::error::Error + 'static));
    while let Some(err) = current {
        text.push(' ');
        text.push_str(&err.to_string().to_lowercase());
        current = err.source();
    }

    TLS_MISMATCH_PATTERNS
        .iter()
        .any(|pattern| text.contains(pattern))
}
