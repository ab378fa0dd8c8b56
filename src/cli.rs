//! CLI argument definitions using clap derive macros.
//!
//! Batch tunables are `Option`s without clap defaults so that a value given on
//! the command line can be told apart from one that should come from the
//! config file.

use std::path::PathBuf;

use clap::Parser;
use mediafetch_core::{MediaKind, PrimingMode};

/// Download the images and videos referenced by a web page.
///
/// Assets are fetched concurrently with per-origin spacing. Requests refused
/// with 403 are retried with cookies primed from the page and, when a browser
/// backend is available, from inside a headless browser.
#[derive(Parser, Debug)]
#[command(name = "mediafetch")]
#[command(author, version, about)]
pub struct Args {
    /// Page to scrape; also sent as Referer and primed for cookies
    pub page_url: String,

    /// Download these asset URLs instead of scraping the page (repeatable)
    #[arg(short = 'a', long = "asset", value_name = "URL")]
    pub assets: Vec<String>,

    /// Which assets to collect: image, video or all
    #[arg(short = 't', long = "type", default_value = "image", value_parser = parse_media_kind)]
    pub kind: MediaKind,

    /// Directory to save files into (default: config value or current directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: Option<u8>,

    /// Minimum delay between requests to the same origin in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub throttle_ms: Option<u64>,

    /// Minimum delay between any two task starts in milliseconds (0 to disable)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub start_interval_ms: Option<u64>,

    /// Attempts per asset in the direct and cookie-primed tiers (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub http_attempts: Option<u32>,

    /// Attempts per asset in the browser tier (1-10)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub browser_attempts: Option<u32>,

    /// Discard HTTP bodies smaller than this many bytes
    #[arg(long, value_name = "BYTES")]
    pub min_file_size: Option<u64>,

    /// When to prime cookies: never, on-forbidden or always
    #[arg(long, value_parser = parse_priming)]
    pub priming: Option<PrimingMode>,

    /// Never fall back to the browser tier
    #[arg(long)]
    pub no_escalation: bool,

    /// Go to the browser tier on the first 403 after priming instead of after retries
    #[arg(long)]
    pub escalate_early: bool,

    /// Per-asset browser budget in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub render_timeout_secs: Option<u64>,

    /// Render pages and fetch refused assets with headless Chromium
    #[arg(long)]
    pub browser: bool,

    /// Netscape cookie file to seed the cookie jar with
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/mediafetch/config.toml)
    #[arg(long, value_name = "FILE", conflicts_with = "no_config")]
    pub config: Option<PathBuf>,

    /// Ignore the config file
    #[arg(long)]
    pub no_config: bool,

    /// Print the discovered asset URLs and exit without downloading
    #[arg(long, conflicts_with_all = ["assets", "single"])]
    pub list: bool,

    /// Treat PAGE_URL as the asset itself and save it under its own file name
    #[arg(long, conflicts_with = "assets")]
    pub single: bool,

    /// Print the batch summary as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_media_kind(value: &str) -> Result<MediaKind, String> {
    value.parse()
}

fn parse_priming(value: &str) -> Result<PrimingMode, String> {
    value.parse()
}
