//! Top-level run: parse flags, build the engine, execute the requested mode.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mediafetch_core::auth::seed_jar_from_file;
use mediafetch_core::{BatchObserver, BatchReport, DownloadEngine, Scraper};
use reqwest::cookie::Jar;
use tracing::{debug, info};

use super::progress_manager::ProgressObserver;
use super::{output, settings, terminal};
use crate::ProcessExit;
use crate::cli::Args;

pub(crate) async fn run_mediafetch() -> Result<ProcessExit> {
    // Parse before tracing so --help works without logs
    let args = Args::parse();

    let file = settings::load_file_config(&args)?;
    let file_config = file.as_ref().map(|(_, config)| config);

    let dumb_terminal = terminal::is_dumb_terminal();
    let log_level = terminal::default_log_level(
        args.quiet,
        args.verbose,
        file_config.and_then(|config| config.verbosity),
    );
    terminal::init_tracing(log_level, terminal::no_color_env_requested() || dumb_terminal);

    debug!(?args, "CLI arguments parsed");
    if let Some((path, _)) = &file {
        debug!(path = %path.display(), "config file loaded");
    }

    let options = settings::build_options(&args, file_config);
    let output_dir = settings::resolve_output_dir(&args, file_config);

    let jar = Arc::new(Jar::default());
    if let Some(path) = &args.cookies {
        let seeded = seed_jar_from_file(path, &jar)
            .with_context(|| format!("failed to load cookies from {}", path.display()))?;
        info!(cookies = seeded, "cookie jar seeded");
    }

    let engine = DownloadEngine::with_cookie_jar(options, jar).context("invalid batch options")?;

    if args.single {
        return run_single(&engine, &args, &output_dir).await;
    }

    let progress = (!args.list
        && !args.json
        && terminal::should_show_progress(std::io::stderr().is_terminal(), args.quiet, dumb_terminal))
    .then(|| Arc::new(ProgressObserver::new()));
    let engine = match &progress {
        Some(observer) => engine.with_observer(Arc::clone(observer) as Arc<dyn BatchObserver>),
        None => engine,
    };

    let scraper = build_scraper(engine, args.browser).await?;

    if args.list {
        let assets = scraper
            .discover(&args.page_url, args.kind)
            .await
            .context("page discovery failed")?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&assets)?);
        } else {
            for asset in &assets {
                println!("{asset}");
            }
        }
        return Ok(ProcessExit::Success);
    }

    let (assets, report) = if args.assets.is_empty() {
        let report = scraper
            .scrape(&args.page_url, args.kind, &output_dir)
            .await
            .context("scrape failed")?;
        (report.assets, report.batch)
    } else {
        let report = scraper
            .engine()
            .download_batch(&args.assets, &args.page_url, &output_dir)
            .await
            .context("batch failed")?;
        (args.assets.clone(), report)
    };

    if let Some(observer) = &progress {
        observer.finish();
    }

    report_results(&args, &output_dir, &assets, &report)?;
    Ok(ProcessExit::from_summary(&report.summary))
}

async fn run_single(engine: &DownloadEngine, args: &Args, output_dir: &Path) -> Result<ProcessExit> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let saved = engine
        .client()
        .download_one(&args.page_url, "", output_dir)
        .await
        .with_context(|| format!("failed to download {}", args.page_url))?;
    if args.json {
        println!(
            "{}",
            serde_json::json!({ "path": saved.path, "bytes": saved.bytes })
        );
    } else if !args.quiet {
        println!("Saved {} ({} bytes)", saved.path.display(), saved.bytes);
    }
    Ok(ProcessExit::Success)
}

fn report_results(args: &Args, output_dir: &Path, assets: &[String], report: &BatchReport) -> Result<()> {
    if args.json {
        let json = output::render_json(&args.page_url, output_dir, assets, report)
            .context("failed to serialize summary")?;
        println!("{json}");
    } else if !args.quiet {
        print!("{}", output::render_summary(report, output_dir));
    }
    info!(
        succeeded = report.summary.success_count,
        failed = report.summary.failure_count,
        total = report.summary.total(),
        "Batch complete"
    );
    Ok(())
}

#[cfg(feature = "chromium")]
async fn build_scraper(engine: DownloadEngine, use_browser: bool) -> Result<Scraper> {
    use mediafetch_core::browser::BrowserFetcher;
    use mediafetch_core::browser::chromium::ChromiumBrowser;

    if !use_browser {
        return Ok(Scraper::new(engine));
    }
    let browser = Arc::new(
        ChromiumBrowser::launch()
            .await
            .context("failed to start headless browser")?,
    );
    debug!("headless browser launched");
    let engine = engine.with_browser(Arc::clone(&browser) as Arc<dyn BrowserFetcher>);
    Ok(Scraper::with_renderer(engine, browser))
}

#[cfg(not(feature = "chromium"))]
#[allow(clippy::unused_async)]
async fn build_scraper(engine: DownloadEngine, use_browser: bool) -> Result<Scraper> {
    if use_browser {
        tracing::warn!("built without the chromium feature; --browser ignored");
    }
    Ok(Scraper::new(engine))
}
