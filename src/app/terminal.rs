use mediafetch_core::config::Verbosity;

pub(crate) fn no_color_env_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_show_progress(
    stderr_is_terminal: bool,
    quiet: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

/// Picks the log filter when `RUST_LOG` is unset.
///
/// Priority: -q > -v/-vv > config file verbosity > info.
pub(crate) fn default_log_level(
    quiet: bool,
    verbose: u8,
    configured: Option<Verbosity>,
) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => configured.map_or("info", Verbosity::filter_directive),
        1 => "debug",
        _ => "trace",
    }
}

pub(crate) fn init_tracing(default_level: &str, no_color: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_env_filter(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_hidden_when_quiet_or_not_a_terminal() {
        assert!(should_show_progress(true, false, false));
        assert!(!should_show_progress(false, false, false));
        assert!(!should_show_progress(true, true, false));
        assert!(!should_show_progress(true, false, true));
    }

    #[test]
    fn test_default_log_level_priority() {
        assert_eq!(default_log_level(false, 0, None), "info");
        assert_eq!(default_log_level(false, 0, Some(Verbosity::Quiet)), "error");
        assert_eq!(default_log_level(false, 1, Some(Verbosity::Quiet)), "debug");
        assert_eq!(default_log_level(false, 3, None), "trace");
        assert_eq!(default_log_level(true, 2, Some(Verbosity::Debug)), "error");
    }
}
