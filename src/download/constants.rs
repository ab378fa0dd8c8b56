//! Constants for the download module (timeouts, throttling, size floors).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout (60 seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default per-task budget for the browser delegate (50 seconds).
pub const RENDER_TIMEOUT_SECS: u64 = 50;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Upper bound on the worker count.
pub const MAX_WORKERS: usize = 100;

/// Default minimum interval between request starts to one origin.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(1200);

/// Default minimum size for bodies fetched over plain HTTP (10 KiB).
pub const DEFAULT_HTTP_MIN_FILE_SIZE: u64 = 10 * 1024;

/// Default minimum size for bodies fetched through the browser (1 KiB).
pub const DEFAULT_BROWSER_MIN_FILE_SIZE: u64 = 1024;

/// Default attempts for the browser tier.
pub const DEFAULT_BROWSER_ATTEMPTS: u32 = 2;
