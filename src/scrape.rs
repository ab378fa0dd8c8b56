//! Page-level orchestration: render once, extract assets, download the batch.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument};

use crate::browser::{BrowserError, HttpPageRenderer, PageRenderer};
use crate::download::{BatchReport, DownloadEngine, EngineError};
use crate::extract::{AssetExtractor, HtmlAssetExtractor, MediaKind};

/// Errors that stop a scrape before or instead of a batch.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The page could not be rendered.
    #[error("failed to render {url}: {source}")]
    Render {
        /// Page URL.
        url: String,
        /// Renderer failure.
        #[source]
        source: BrowserError,
    },

    /// The batch could not be started.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What a scrape found and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeReport {
    /// Asset URLs in the order they were dispatched.
    pub assets: Vec<String>,
    /// Batch result for those assets.
    pub batch: BatchReport,
}

/// Renders a page, extracts its assets and downloads them.
pub struct Scraper {
    engine: DownloadEngine,
    renderer: Arc<dyn PageRenderer>,
    extractor: Arc<dyn AssetExtractor>,
    render_timeout: Duration,
}

impl std::fmt::Debug for Scraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scraper")
            .field("engine", &self.engine)
            .field("render_timeout", &self.render_timeout)
            .finish_non_exhaustive()
    }
}

impl Scraper {
    /// Scraper rendering pages with a plain GET through the engine's client.
    #[must_use]
    pub fn new(engine: DownloadEngine) -> Self {
        let renderer = Arc::new(HttpPageRenderer::new(engine.client().clone()));
        Self::with_renderer(engine, renderer)
    }

    /// Scraper using `renderer` for the page and [`HtmlAssetExtractor`] for assets.
    #[must_use]
    pub fn with_renderer(engine: DownloadEngine, renderer: Arc<dyn PageRenderer>) -> Self {
        let render_timeout = engine.options().render_timeout;
        Self {
            engine,
            renderer,
            extractor: Arc::new(HtmlAssetExtractor),
            render_timeout,
        }
    }

    /// Replaces the asset extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn AssetExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Returns the engine batches run on.
    #[must_use]
    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }

    /// Returns the asset URLs of `page_url` without downloading them.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Render`] if the page cannot be rendered.
    #[instrument(skip(self))]
    pub async fn discover(&self, page_url: &str, kind: MediaKind) -> Result<Vec<String>, ScrapeError> {
        let html = self
            .renderer
            .render(page_url, self.render_timeout)
            .await
            .map_err(|source| ScrapeError::Render {
                url: page_url.to_string(),
                source,
            })?;
        let assets = self.extractor.extract(&html, page_url, kind);
        info!(count = assets.len(), kind = ?kind, "assets discovered");
        Ok(assets)
    }

    /// Discovers the assets of `page_url` and downloads them into `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Render`] if the page cannot be rendered and
    /// [`ScrapeError::Engine`] if the batch cannot start. Per-asset failures
    /// are reported in the batch summary.
    #[instrument(skip(self), fields(output_dir = %output_dir.display()))]
    pub async fn scrape(
        &self,
        page_url: &str,
        kind: MediaKind,
        output_dir: &Path,
    ) -> Result<ScrapeReport, ScrapeError> {
        let assets = self.discover(page_url, kind).await?;
        let batch = self
            .engine
            .download_batch(&assets, page_url, output_dir)
            .await?;
        Ok(ScrapeReport { assets, batch })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::browser::NoopBrowser;
    use crate::download::{BatchOptions, Tier};
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn engine() -> DownloadEngine {
        let mut options = BatchOptions {
            throttle_interval: Duration::ZERO,
            ..BatchOptions::default()
        };
        options.http_tier.min_file_size = 0;
        DownloadEngine::new(options).unwrap()
    }

    struct FixedPage(&'static str);

    #[async_trait]
    impl PageRenderer for FixedPage {
        async fn render(&self, _url: &str, _timeout: Duration) -> Result<String, BrowserError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_scrape_downloads_extracted_assets_with_referer() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let page_url = format!("{}/gallery", mock_server.uri());
        Mock::given(method("GET"))
            .and(path("/gallery"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><img src="/img/a.png"><img src="/img/b.jpg"></body></html>"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/a.png"))
            .and(header("Referer", page_url.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 64]))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/b.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let report = Scraper::new(engine())
            .scrape(&page_url, MediaKind::Image, dir.path())
            .await
            .unwrap();

        assert_eq!(report.assets.len(), 2);
        assert_eq!(report.batch.summary.success_count, 1);
        assert_eq!(report.batch.summary.failure_count, 1);
        assert_eq!(report.batch.outcomes[0].tier(), Some(Tier::Direct));
    }

    #[tokio::test]
    async fn test_render_failure_is_scrape_error() {
        let dir = tempfile::tempdir().unwrap();
        let scraper = Scraper::with_renderer(engine(), Arc::new(NoopBrowser));

        let result = scraper
            .scrape("https://example.com/", MediaKind::All, dir.path())
            .await;
        assert!(matches!(
            result,
            Err(ScrapeError::Render {
                source: BrowserError::Unavailable,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_discover_uses_custom_renderer() {
        let scraper = Scraper::with_renderer(
            engine(),
            Arc::new(FixedPage(r#"<video src="clip.mp4"></video>"#)),
        );
        let assets = scraper
            .discover("https://example.com/watch/", MediaKind::Video)
            .await
            .unwrap();
        assert_eq!(assets, vec!["https://example.com/watch/clip.mp4"]);
    }
}
