//! Per-origin request throttling.
//!
//! This module provides the [`DomainThrottle`] which enforces a minimum interval
//! between request starts to the same origin, and the [`StartGate`] which spaces
//! out task starts across the whole batch regardless of origin.
//!
//! # Overview
//!
//! Throttling is applied per origin (scheme, host and port), so requests to
//! different origins proceed in parallel without waiting for each other. A
//! worker that must wait keeps its origin's lock while sleeping; only workers
//! targeting the same origin queue up behind it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mediafetch_core::download::DomainThrottle;
//!
//! # async fn example() {
//! let throttle = Arc::new(DomainThrottle::new(Duration::from_millis(1200)));
//!
//! // First request to an origin proceeds immediately
//! throttle.acquire("https://cdn.example.com").await;
//!
//! // Second request to the same origin waits for the interval
//! throttle.acquire("https://cdn.example.com").await;
//!
//! // A different origin is not gated
//! throttle.acquire("https://img.other.com").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

/// Warning threshold for cumulative delay per origin (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-origin request throttle shared by all workers of a batch.
///
/// Origins are registered lazily: the first `acquire` for an origin atomically
/// creates its state through the `DashMap` entry API, so two workers racing on
/// a new origin always end up sharing one lock.
#[derive(Debug)]
pub struct DomainThrottle {
    /// Minimum time between two request starts to the same origin.
    interval: Duration,

    /// Per-origin state. Values are `Arc`ed so the map shard lock is released
    /// before awaiting on the inner mutex.
    origins: DashMap<String, Arc<OriginState>>,
}

/// Timing state for one origin.
#[derive(Debug)]
struct OriginState {
    /// Start time of the most recent request. `None` until the first request.
    last_request: Mutex<Option<Instant>>,

    /// Earliest instant the next request may start, set by server rate limits.
    blocked_until: Mutex<Option<Instant>>,

    /// Total delay imposed on this origin, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

impl OriginState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            blocked_until: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl DomainThrottle {
    /// Creates a throttle enforcing `interval` between request starts per origin.
    ///
    /// A zero interval disables the cadence check; server-mandated blocks from
    /// [`record_rate_limit`](Self::record_rate_limit) still apply.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        debug!("creating domain throttle");
        Self {
            interval,
            origins: DashMap::new(),
        }
    }

    /// Returns the configured per-origin interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the number of distinct origins seen so far.
    #[must_use]
    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }

    fn state_for(&self, origin: &str) -> Arc<OriginState> {
        self.origins
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(OriginState::new()))
            .clone()
    }

    /// Waits until a request to `origin` may start, then records the start.
    ///
    /// The origin's lock is held across the wait, so concurrent callers for the
    /// same origin are serialized and each observes the previous start time.
    /// Callers for other origins are never blocked.
    #[instrument(skip(self))]
    pub async fn acquire(&self, origin: &str) {
        let state = self.state_for(origin);
        let mut last_request = state.last_request.lock().await;

        let now = Instant::now();
        let mut ready_at = last_request.map_or(now, |last| last + self.interval);
        if let Some(blocked) = *state.blocked_until.lock().await {
            ready_at = ready_at.max(blocked);
        }

        if ready_at > now {
            let delay = ready_at - now;
            let cumulative = state.add_cumulative_delay(delay);

            debug!(
                origin,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "throttling request"
            );

            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    origin,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive throttling - consider fewer assets per origin"
                );
            }

            tokio::time::sleep_until(ready_at).await;
        } else if last_request.is_none() {
            debug!(origin, "first request to origin - no delay");
        }

        *last_request = Some(Instant::now());
    }

    /// Records a server-mandated delay (from a `Retry-After` header).
    ///
    /// No request to the origin, from any worker, starts before the delay has
    /// elapsed.
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, origin: &str, delay: Duration) {
        let state = self.state_for(origin);
        let until = Instant::now() + delay;
        {
            let mut blocked = state.blocked_until.lock().await;
            *blocked = Some(blocked.map_or(until, |current| current.max(until)));
        }
        let cumulative = state.add_cumulative_delay(delay);

        debug!(
            origin,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                origin,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - origin may be blocking us"
            );
        }
    }
}

/// Global minimum delay between any two task starts, regardless of origin.
///
/// A zero interval disables the gate.
#[derive(Debug)]
pub struct StartGate {
    interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl StartGate {
    /// Creates a gate spacing task starts at least `interval` apart.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_start: Mutex::new(None),
        }
    }

    /// Returns whether the gate applies any delay at all.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }

    /// Waits for the next start slot.
    pub async fn wait(&self) {
        if self.is_disabled() {
            return;
        }
        let mut last_start = self.last_start.lock().await;
        if let Some(last) = *last_start {
            tokio::time::sleep_until(last + self.interval).await;
        }
        *last_start = Some(Instant::now());
    }
}

/// Computes the throttling origin of an asset URL.
///
/// The origin is the ASCII serialization of scheme, host and (non-default)
/// port. Returns `None` for malformed URLs and for schemes other than
/// `http`/`https`.
///
/// # Examples
///
/// ```
/// use mediafetch_core::download::rate_limiter::origin_of;
///
/// assert_eq!(origin_of("https://Example.COM/a.jpg").as_deref(), Some("https://example.com"));
/// assert_eq!(origin_of("http://localhost:8080/x").as_deref(), Some("http://localhost:8080"));
/// assert_eq!(origin_of("ftp://example.com/a.jpg"), None);
/// assert_eq!(origin_of("not a url"), None);
/// ```
#[must_use]
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed.origin().ascii_serialization())
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mediafetch_core::download::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(cap_retry_after(duration));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(cap_retry_after(duration)),
            Err(_) => {
                debug!(header_value, "Retry-After date is in the past");
                Some(Duration::ZERO)
            }
        },
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        return MAX_RETRY_AFTER;
    }
    duration
}
