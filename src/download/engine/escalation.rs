//! Fetch escalation: direct, cookie-primed, then browser-rendered.
//!
//! A task starts in the cheapest tier and only moves up when the origin keeps
//! answering 403. The tier is explicit state threaded through the attempt
//! loop; each tier's retry budget and size floor come from its [`TierPolicy`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::BatchContext;
use super::persistence::{Persisted, persist_bytes, persist_response};
use crate::browser::{BrowserError, BrowserFetcher};
use crate::download::client::{RequestMode, content_type, is_tls_version_mismatch};
use crate::download::constants::{
    DEFAULT_BROWSER_ATTEMPTS, DEFAULT_BROWSER_MIN_FILE_SIZE, DEFAULT_HTTP_MIN_FILE_SIZE,
};
use crate::download::filename::{FALLBACK_EXTENSION, classify_extension, extension_from_signature};
use crate::download::rate_limiter::{origin_of, parse_retry_after};
use crate::download::retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy, classify_error};
use crate::download::DownloadError;

/// One strategy level in the escalation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Tier {
    /// Plain GET with the browser header profile, no cookies.
    Direct,
    /// GET through the batch cookie jar after priming the referring page.
    CookiePrimed,
    /// Bytes fetched from inside a headless browser.
    BrowserRendered,
}

impl Tier {
    /// Name used in summaries and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::CookiePrimed => "CookiePrimed",
            Self::BrowserRendered => "BrowserRendered",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry budget and size floor for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    /// Attempts allowed in the tier, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; grows linearly.
    pub base_delay: Duration,
    /// Cap on one computed delay.
    pub max_delay: Duration,
    /// Cap on total waiting in the tier.
    pub wait_ceiling: Duration,
    /// Upper bound of jitter added to computed delays.
    pub max_jitter: Duration,
    /// Bodies smaller than this are deleted and retried.
    pub min_file_size: u64,
}

impl TierPolicy {
    /// Defaults for the direct and cookie-primed tiers.
    #[must_use]
    pub fn http_default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            wait_ceiling: Duration::from_secs(10),
            max_jitter: Duration::from_millis(300),
            min_file_size: DEFAULT_HTTP_MIN_FILE_SIZE,
        }
    }

    /// Defaults for the browser-rendered tier.
    #[must_use]
    pub fn browser_default() -> Self {
        Self {
            max_attempts: DEFAULT_BROWSER_ATTEMPTS,
            min_file_size: DEFAULT_BROWSER_MIN_FILE_SIZE,
            ..Self::http_default()
        }
    }

    /// Retry policy enforcing this tier's budget.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.base_delay,
            self.max_delay,
            self.wait_ceiling,
        )
        .with_max_jitter(self.max_jitter)
    }
}

/// When the cookie-primed tier is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PrimingMode {
    /// Never prime; every request is direct.
    Never,
    /// Switch to primed requests after the first 403.
    #[default]
    OnForbidden,
    /// Prime before the first request of every task.
    Always,
}

impl FromStr for PrimingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "never" => Ok(Self::Never),
            "on-forbidden" | "on-403" => Ok(Self::OnForbidden),
            "always" => Ok(Self::Always),
            other => Err(format!(
                "invalid priming mode '{other}': expected never, on-forbidden or always"
            )),
        }
    }
}

/// Result of the direct/cookie-primed phase.
enum HttpPhase {
    Done(Result<(Tier, Persisted), DownloadError>),
    Escalate(DownloadError),
}

/// Escalation state for one remote task.
pub(super) struct EscalationRun<'a> {
    ctx: &'a BatchContext,
    index: usize,
    url: &'a str,
    origin: &'a str,
    attempts: u32,
}

impl<'a> EscalationRun<'a> {
    pub(super) fn new(ctx: &'a BatchContext, index: usize, url: &'a str, origin: &'a str) -> Self {
        Self {
            ctx,
            index,
            url,
            origin,
            attempts: 0,
        }
    }

    /// Network requests issued so far (priming excluded).
    pub(super) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Drives the task through the tiers until success or a terminal error.
    #[instrument(skip(self), fields(url = %self.url, origin = %self.origin))]
    pub(super) async fn run(&mut self) -> Result<(Tier, Persisted), DownloadError> {
        match self.http_tiers().await {
            HttpPhase::Done(result) => result,
            HttpPhase::Escalate(http_error) => match self.ctx.browser.clone() {
                Some(browser) => self.browser_tier(browser.as_ref()).await,
                None => Err(http_error),
            },
        }
    }

    fn can_escalate(&self) -> bool {
        self.ctx.options.escalation_enabled && self.ctx.browser.is_some()
    }

    async fn http_tiers(&mut self) -> HttpPhase {
        let ctx = self.ctx;
        let options = &ctx.options;
        let policy = options.http_tier.retry_policy();
        let mut tier = if options.priming == PrimingMode::Always {
            Tier::CookiePrimed
        } else {
            Tier::Direct
        };
        let mut relaxed_tls = false;
        let mut attempt = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            attempt += 1;
            if tier == Tier::CookiePrimed {
                self.ensure_primed().await;
            }

            // Relaxed validation covers one repeated attempt only.
            let relaxed = std::mem::take(&mut relaxed_tls);
            let error = match self.http_attempt(tier, relaxed).await {
                Ok(saved) => return HttpPhase::Done(Ok((tier, saved))),
                Err(error) => error,
            };

            if !relaxed && is_tls_version_mismatch(&error) {
                warn!(
                    url = %self.url,
                    attempt,
                    error = %error,
                    "TLS protocol mismatch, repeating attempt with relaxed certificate validation"
                );
                relaxed_tls = true;
                attempt -= 1;
                continue;
            }

            if error.is_forbidden() {
                let cheaper_step =
                    tier == Tier::Direct && options.priming == PrimingMode::OnForbidden;
                if cheaper_step {
                    debug!(url = %self.url, "403 on direct request, switching to cookie-primed");
                    tier = Tier::CookiePrimed;
                }

                let final_attempt = policy.is_final_attempt(attempt);
                let escalate_now =
                    final_attempt || (options.escalate_on_first_forbidden && !cheaper_step);
                if escalate_now && self.can_escalate() {
                    info!(url = %self.url, attempt, "persistent 403, escalating to browser");
                    return HttpPhase::Escalate(error);
                }
                if final_attempt {
                    return HttpPhase::Done(Err(error));
                }
            }

            let retry_after = self.server_delay(&error).await;
            match policy.should_retry(classify_error(&error), attempt, waited, retry_after) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        url = %self.url,
                        tier = %tier,
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = retry_after.is_some(),
                        error = %error,
                        "retrying request"
                    );
                    waited += delay;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %self.url, %reason, "not retrying request");
                    if error.is_forbidden() && self.can_escalate() {
                        info!(url = %self.url, attempt, "retry budget spent on 403, escalating to browser");
                        return HttpPhase::Escalate(error);
                    }
                    return HttpPhase::Done(Err(error));
                }
            }
        }
    }

    async fn http_attempt(
        &mut self,
        tier: Tier,
        relaxed_tls: bool,
    ) -> Result<Persisted, DownloadError> {
        self.ctx.throttle.acquire(self.origin).await;
        self.attempts += 1;
        debug!(url = %self.url, tier = %tier, request = self.attempts, "sending request");

        let mode = RequestMode {
            with_cookies: tier == Tier::CookiePrimed,
            relaxed_tls,
        };
        let response = self
            .ctx
            .client
            .fetch_asset(self.url, &self.ctx.page_url, mode)
            .await?;

        let extension = classify_extension(self.url, content_type(&response).as_deref());
        let path = self.ctx.output_path(self.index, &extension);
        persist_response(
            response,
            self.url,
            &path,
            self.ctx.options.http_tier.min_file_size,
        )
        .await
    }

    /// Primes the referring page once per asset origin per batch.
    async fn ensure_primed(&self) {
        let cell = self
            .ctx
            .primed
            .entry(self.origin.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(|| async {
            let Some(page_origin) = origin_of(&self.ctx.page_url) else {
                debug!(origin = %self.origin, "no valid page URL, skipping cookie priming");
                return;
            };
            self.ctx.throttle.acquire(&page_origin).await;
            let primed = self.ctx.client.prime(&self.ctx.page_url).await;
            debug!(origin = %self.origin, primed, "cookie priming finished");
        })
        .await;
    }

    /// Server-mandated delay from a 429's `Retry-After`, shared with the throttle.
    async fn server_delay(&self, error: &DownloadError) -> Option<Duration> {
        let DownloadError::HttpStatus {
            status: 429,
            retry_after: Some(header),
            ..
        } = error
        else {
            return None;
        };

        let delay = parse_retry_after(header)?;
        self.ctx.throttle.record_rate_limit(self.origin, delay).await;
        debug!(
            url = %self.url,
            retry_after = %header,
            delay_ms = delay.as_millis(),
            "using Retry-After delay"
        );
        Some(delay)
    }

    async fn browser_tier(
        &mut self,
        browser: &dyn BrowserFetcher,
    ) -> Result<(Tier, Persisted), DownloadError> {
        let ctx = self.ctx;
        let options = &ctx.options;
        let policy = options.browser_tier.retry_policy();
        let timeout = options.render_timeout;
        let mut attempt = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            attempt += 1;
            self.ctx.throttle.acquire(self.origin).await;
            self.attempts += 1;
            debug!(url = %self.url, attempt, "fetching through browser");

            let fetched = tokio::time::timeout(timeout, browser.fetch_via_browser(self.url)).await;
            let error = match fetched {
                Err(_) | Ok(Err(BrowserError::Timeout { .. })) => {
                    warn!(url = %self.url, timeout_secs = timeout.as_secs(), "browser fetch timed out");
                    return Err(DownloadError::render_timeout(self.url, timeout.as_secs()));
                }
                Ok(Err(error)) => DownloadError::browser(self.url, error.to_string()),
                Ok(Ok(bytes)) => {
                    let extension = browser_extension(self.url, &bytes);
                    let path = ctx.output_path(self.index, &extension);
                    let min_size = options.browser_tier.min_file_size;
                    match persist_bytes(&bytes, &path, self.url, min_size).await {
                        Ok(saved) => return Ok((Tier::BrowserRendered, saved)),
                        Err(error) => error,
                    }
                }
            };

            match policy.should_retry(classify_error(&error), attempt, waited, None) {
                RetryDecision::Retry { delay, .. } => {
                    info!(
                        url = %self.url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying browser fetch"
                    );
                    waited += delay;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %self.url, %reason, "browser tier exhausted");
                    return Err(error);
                }
            }
        }
    }
}

/// Extension for browser-fetched bytes: URL suffix, then magic bytes.
fn browser_extension(url: &str, bytes: &[u8]) -> String {
    let from_url = classify_extension(url, None);
    if from_url != FALLBACK_EXTENSION {
        return from_url;
    }
    extension_from_signature(bytes)
        .unwrap_or(FALLBACK_EXTENSION)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering_follows_escalation() {
        assert!(Tier::Direct < Tier::CookiePrimed);
        assert!(Tier::CookiePrimed < Tier::BrowserRendered);
    }

    #[test]
    fn test_tier_policy_defaults() {
        let http = TierPolicy::http_default();
        assert_eq!(http.max_attempts, 3);
        assert_eq!(http.min_file_size, 10 * 1024);

        let browser = TierPolicy::browser_default();
        assert_eq!(browser.max_attempts, 2);
        assert_eq!(browser.min_file_size, 1024);
        assert_eq!(browser.retry_policy().max_attempts(), 2);
    }

    #[test]
    fn test_priming_mode_parse() {
        assert_eq!("never".parse::<PrimingMode>(), Ok(PrimingMode::Never));
        assert_eq!("On_Forbidden".parse::<PrimingMode>(), Ok(PrimingMode::OnForbidden));
        assert_eq!("always".parse::<PrimingMode>(), Ok(PrimingMode::Always));
        assert!("sometimes".parse::<PrimingMode>().is_err());
    }

    #[test]
    fn test_browser_extension_prefers_url_then_signature() {
        assert_eq!(browser_extension("https://a.example/x.gif", b"\x89PNG\r\n\x1a\n"), ".gif");
        assert_eq!(browser_extension("https://a.example/x", b"\x89PNG\r\n\x1a\n...."), ".png");
        assert_eq!(browser_extension("https://a.example/x", b"plain"), ".bin");
    }
}
