//! Merges command-line flags, the config file and built-in defaults.
//!
//! Precedence: explicit CLI value > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use mediafetch_core::BatchOptions;
use mediafetch_core::config::FileConfig;
use tracing::debug;

use crate::cli::Args;

/// Loads the config file selected by `--config`, the default location, or none.
pub(crate) fn load_file_config(args: &Args) -> Result<Option<(PathBuf, FileConfig)>> {
    if args.no_config {
        return Ok(None);
    }
    if let Some(path) = &args.config {
        let config = FileConfig::load(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?;
        return Ok(Some((path.clone(), config)));
    }
    let (path, config) = FileConfig::load_default().context("failed to load default config file")?;
    Ok(path.zip(config))
}

/// Builds the batch options for this run.
pub(crate) fn build_options(args: &Args, file: Option<&FileConfig>) -> BatchOptions {
    let mut options = BatchOptions::default();
    if let Some(file) = file {
        file.apply_to(&mut options);
    }

    if let Some(workers) = args.workers {
        options.workers = usize::from(workers);
    }
    if let Some(ms) = args.throttle_ms {
        options.throttle_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = args.start_interval_ms {
        options.start_interval = Duration::from_millis(ms);
    }
    if let Some(attempts) = args.http_attempts {
        options.http_tier.max_attempts = attempts;
    }
    if let Some(attempts) = args.browser_attempts {
        options.browser_tier.max_attempts = attempts;
    }
    if let Some(bytes) = args.min_file_size {
        options.http_tier.min_file_size = bytes;
    }
    if let Some(priming) = args.priming {
        options.priming = priming;
    }
    if args.no_escalation {
        options.escalation_enabled = false;
    }
    if args.escalate_early {
        options.escalate_on_first_forbidden = true;
    }
    if let Some(secs) = args.render_timeout_secs {
        options.render_timeout = Duration::from_secs(secs);
    }

    debug!(?options, "batch options resolved");
    options
}

/// Output directory: `-o`, then the config file, then the working directory.
pub(crate) fn resolve_output_dir(args: &Args, file: Option<&FileConfig>) -> PathBuf {
    args.output_dir
        .clone()
        .or_else(|| file.and_then(|file| file.output_dir.clone()))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;
    use mediafetch_core::PrimingMode;

    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["mediafetch"];
        argv.extend_from_slice(extra);
        argv.push("https://example.com/");
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_without_config() {
        let options = build_options(&args(&[]), None);
        let defaults = BatchOptions::default();
        assert_eq!(options.workers, defaults.workers);
        assert_eq!(options.throttle_interval, defaults.throttle_interval);
        assert!(options.escalation_enabled);
        assert_eq!(resolve_output_dir(&args(&[]), None), PathBuf::from("."));
    }

    #[test]
    fn test_config_fills_unset_flags() {
        let file = FileConfig::parse("workers = 9\nthrottle_ms = 250\noutput_dir = \"/tmp/media\"\n").unwrap();
        let parsed = args(&[]);
        let options = build_options(&parsed, Some(&file));
        assert_eq!(options.workers, 9);
        assert_eq!(options.throttle_interval, Duration::from_millis(250));
        assert_eq!(
            resolve_output_dir(&parsed, Some(&file)),
            PathBuf::from("/tmp/media")
        );
    }

    #[test]
    fn test_explicit_flags_override_config() {
        let file = FileConfig::parse("workers = 9\npriming = \"never\"\nescalation = true\n").unwrap();
        let parsed = args(&["-w", "2", "--priming", "always", "--no-escalation", "-o", "out"]);
        let options = build_options(&parsed, Some(&file));
        assert_eq!(options.workers, 2);
        assert_eq!(options.priming, PrimingMode::Always);
        assert!(!options.escalation_enabled);
        assert_eq!(resolve_output_dir(&parsed, Some(&file)), PathBuf::from("out"));
    }

    #[test]
    fn test_no_config_skips_loading() {
        assert!(load_file_config(&args(&["--no-config"])).unwrap().is_none());
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let parsed = args(&["--config", missing.to_str().unwrap()]);
        let err = load_file_config(&parsed).unwrap_err();
        assert!(err.to_string().contains("failed to load config file"));
    }
}
