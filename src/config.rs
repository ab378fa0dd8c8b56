//! File configuration for batch defaults.
//!
//! The file is a flat list of `key = value` lines; `#` starts a comment
//! outside double-quoted strings. Strings are double-quoted, numbers are bare
//! non-negative integers, booleans are `true`/`false`. Unknown keys are errors.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::download::constants::MAX_WORKERS;
use crate::download::{BatchOptions, PrimingMode};
use crate::user_agent::UserAgentPool;

/// Largest accepted throttle or start interval, in milliseconds.
const MAX_INTERVAL_MS: u64 = 60_000;
/// Accepted range for timeouts, in seconds.
const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=3600;
/// Accepted range for per-tier attempt budgets.
const ATTEMPTS_RANGE: std::ops::RangeInclusive<u64> = 1..=10;

/// Errors loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not `key = value`.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax {
        /// 1-based line number.
        line: usize,
    },

    /// The key is not recognized.
    #[error("unknown configuration key '{key}' on line {line}")]
    UnknownKey {
        /// The key as written.
        key: String,
        /// 1-based line number.
        line: usize,
    },

    /// The value does not parse or is out of range.
    #[error("invalid `{key}` value on line {line}: {reason}")]
    InvalidValue {
        /// The key.
        key: String,
        /// 1-based line number.
        line: usize,
        /// What is wrong with the value.
        reason: String,
    },
}

/// Log verbosity selectable from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// `info`.
    Default,
    /// `debug`.
    Verbose,
    /// `error`.
    Quiet,
    /// `trace`.
    Debug,
}

impl Verbosity {
    /// `tracing` filter directive for this level.
    #[must_use]
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Values read from the config file; `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default output directory.
    pub output_dir: Option<PathBuf>,
    /// Worker count (1..=100).
    pub workers: Option<usize>,
    /// Per-origin request spacing in milliseconds.
    pub throttle_ms: Option<u64>,
    /// Global task start spacing in milliseconds.
    pub start_interval_ms: Option<u64>,
    /// Attempts for the direct/cookie-primed tiers.
    pub http_attempts: Option<u32>,
    /// Attempts for the browser tier.
    pub browser_attempts: Option<u32>,
    /// Size floor for HTTP bodies, in bytes.
    pub min_file_size: Option<u64>,
    /// Size floor for browser-fetched bodies, in bytes.
    pub browser_min_file_size: Option<u64>,
    /// Cookie priming mode.
    pub priming: Option<PrimingMode>,
    /// Whether the browser tier may be used.
    pub escalation: Option<bool>,
    /// Escalate on the first 403 once priming is exhausted.
    pub escalate_on_first_forbidden: Option<bool>,
    /// Request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Browser render/fetch timeout in seconds.
    pub render_timeout_secs: Option<u64>,
    /// User-Agent strings; each `user_agent` line adds one.
    pub user_agents: Vec<String>,
    /// Log verbosity.
    pub verbosity: Option<Verbosity>,
}

impl FileConfig {
    /// Parses config text.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first offending line.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for (index, raw_line) in raw.lines().enumerate() {
            let line = index + 1;
            let text = strip_inline_comment(raw_line).trim();
            if text.is_empty() {
                continue;
            }
            let Some((key, value)) = text.split_once('=') else {
                return Err(ConfigError::Syntax { line });
            };
            cfg.set(key.trim(), value.trim(), line)?;
        }
        Ok(cfg)
    }

    fn set(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: key.to_string(),
            line,
            reason,
        };

        match key {
            "output_dir" => self.output_dir = Some(PathBuf::from(parse_string(value).map_err(invalid)?)),
            "workers" => {
                let workers = parse_in_range(value, 1..=MAX_WORKERS as u64).map_err(invalid)?;
                self.workers = usize::try_from(workers).ok();
            }
            "throttle_ms" => {
                self.throttle_ms = Some(parse_in_range(value, 0..=MAX_INTERVAL_MS).map_err(invalid)?);
            }
            "start_interval_ms" => {
                self.start_interval_ms = Some(parse_in_range(value, 0..=MAX_INTERVAL_MS).map_err(invalid)?);
            }
            "http_attempts" => {
                self.http_attempts = Some(parse_attempts(value).map_err(invalid)?);
            }
            "browser_attempts" => {
                self.browser_attempts = Some(parse_attempts(value).map_err(invalid)?);
            }
            "min_file_size" => {
                self.min_file_size = Some(parse_in_range(value, 0..=u64::MAX).map_err(invalid)?);
            }
            "browser_min_file_size" => {
                self.browser_min_file_size = Some(parse_in_range(value, 0..=u64::MAX).map_err(invalid)?);
            }
            "priming" => {
                let mode = parse_string(value).map_err(invalid)?;
                self.priming = Some(mode.parse().map_err(invalid)?);
            }
            "escalation" => self.escalation = Some(parse_bool(value).map_err(invalid)?),
            "escalate_on_first_forbidden" => {
                self.escalate_on_first_forbidden = Some(parse_bool(value).map_err(invalid)?);
            }
            "request_timeout_secs" => {
                self.request_timeout_secs = Some(parse_in_range(value, TIMEOUT_RANGE_SECS).map_err(invalid)?);
            }
            "connect_timeout_secs" => {
                self.connect_timeout_secs = Some(parse_in_range(value, TIMEOUT_RANGE_SECS).map_err(invalid)?);
            }
            "render_timeout_secs" => {
                self.render_timeout_secs = Some(parse_in_range(value, TIMEOUT_RANGE_SECS).map_err(invalid)?);
            }
            "user_agent" => {
                let agent = parse_string(value).map_err(invalid)?;
                if agent.trim().is_empty() {
                    return Err(invalid("user agent must not be empty".to_string()));
                }
                self.user_agents.push(agent);
            }
            "verbosity" => {
                let label = parse_string(value).map_err(invalid)?;
                self.verbosity = Some(parse_verbosity(&label).map_err(invalid)?);
            }
            unknown => {
                return Err(ConfigError::UnknownKey {
                    key: unknown.to_string(),
                    line,
                });
            }
        }
        Ok(())
    }

    /// Reads the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] on I/O failure, otherwise as [`parse`](Self::parse).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Loads the default config file when it exists.
    ///
    /// Returns the resolved path (if a base directory is known) and the
    /// parsed config (if the file exists).
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load) for an existing file.
    pub fn load_default() -> Result<(Option<PathBuf>, Option<Self>), ConfigError> {
        let Some(path) = default_config_path() else {
            return Ok((None, None));
        };
        if !path.exists() {
            return Ok((Some(path), None));
        }
        let config = Self::load(&path)?;
        Ok((Some(path), Some(config)))
    }

    /// Overlays the values that are set onto `options`.
    pub fn apply_to(&self, options: &mut BatchOptions) {
        if let Some(workers) = self.workers {
            options.workers = workers;
        }
        if let Some(ms) = self.throttle_ms {
            options.throttle_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.start_interval_ms {
            options.start_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.http_attempts {
            options.http_tier.max_attempts = attempts;
        }
        if let Some(attempts) = self.browser_attempts {
            options.browser_tier.max_attempts = attempts;
        }
        if let Some(bytes) = self.min_file_size {
            options.http_tier.min_file_size = bytes;
        }
        if let Some(bytes) = self.browser_min_file_size {
            options.browser_tier.min_file_size = bytes;
        }
        if let Some(priming) = self.priming {
            options.priming = priming;
        }
        if let Some(enabled) = self.escalation {
            options.escalation_enabled = enabled;
        }
        if let Some(enabled) = self.escalate_on_first_forbidden {
            options.escalate_on_first_forbidden = enabled;
        }
        if let Some(secs) = self.request_timeout_secs {
            options.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connect_timeout_secs {
            options.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.render_timeout_secs {
            options.render_timeout = Duration::from_secs(secs);
        }
        if let Some(pool) = UserAgentPool::new(self.user_agents.iter().cloned()) {
            options.user_agents = pool;
        }
    }
}

/// Default config location.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/mediafetch/config.toml`
/// 2. `$HOME/.config/mediafetch/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = env_var_non_empty("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join("mediafetch").join("config.toml"));
    }
    let home = env_var_non_empty("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mediafetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty(name: &str) -> Option<OsString> {
    env::var_os(name).filter(|value| !value.is_empty())
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string(value: &str) -> Result<String, String> {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(ToString::to_string)
        .ok_or_else(|| "expected a double-quoted string".to_string())
}

fn parse_in_range(value: &str, range: std::ops::RangeInclusive<u64>) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|_| format!("expected a non-negative integer, got '{value}'"))?;
    if !range.contains(&parsed) {
        return Err(format!(
            "{parsed} is out of range {}..={}",
            range.start(),
            range.end()
        ));
    }
    Ok(parsed)
}

fn parse_attempts(value: &str) -> Result<u32, String> {
    let attempts = parse_in_range(value, ATTEMPTS_RANGE)?;
    u32::try_from(attempts).map_err(|_| format!("{attempts} does not fit in u32"))
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected 'true' or 'false', got '{other}'")),
    }
}

fn parse_verbosity(value: &str) -> Result<Verbosity, String> {
    match value {
        "default" => Ok(Verbosity::Default),
        "verbose" => Ok(Verbosity::Verbose),
        "quiet" => Ok(Verbosity::Quiet),
        "debug" => Ok(Verbosity::Debug),
        other => Err(format!(
            "expected one of default, verbose, quiet, debug; got '{other}'"
        )),
    }
}
