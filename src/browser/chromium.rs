//! Headless Chromium backend using chromiumoxide.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use tracing::{debug, instrument, warn};

use super::{BrowserError, BrowserFetcher, PageRenderer};

/// Environment variable overriding the Chromium executable.
pub const CHROMIUM_PATH_ENV: &str = "MEDIAFETCH_CHROMIUM_PATH";

/// In-page script: fetch the asset with the page's cookies and return it as base64.
const FETCH_AS_BASE64: &str = r"
(async (target) => {
    const response = await fetch(target, { credentials: 'include' });
    if (!response.ok) {
        throw new Error('HTTP ' + response.status);
    }
    const bytes = new Uint8Array(await response.arrayBuffer());
    let binary = '';
    for (let i = 0; i < bytes.length; i += 0x8000) {
        binary += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
    }
    return btoa(binary);
})";

/// Chromium instance shared by every render and fetch of a batch.
pub struct ChromiumBrowser {
    browser: Browser,
}

impl std::fmt::Debug for ChromiumBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumBrowser").finish_non_exhaustive()
    }
}

impl ChromiumBrowser {
    /// Launches headless Chromium.
    ///
    /// Uses `MEDIAFETCH_CHROMIUM_PATH` when set, otherwise chromiumoxide's own
    /// executable detection.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Launch`] if the configuration is rejected or the
    /// process cannot be started.
    pub async fn launch() -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if let Some(path) = std::env::var_os(CHROMIUM_PATH_ENV).map(PathBuf::from) {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    debug!(error = %error, "browser handler event error");
                }
            }
        });

        Ok(Self { browser })
    }

    /// Opens a blank tab, then navigates, so the guard exists before any
    /// navigation can stall.
    async fn open(&self, url: &str) -> Result<OpenPage, BrowserError> {
        let navigation = |message: String| BrowserError::Navigation {
            url: url.to_string(),
            message,
        };
        let page = OpenPage::new(
            self.browser
                .new_page("about:blank")
                .await
                .map_err(|e| navigation(e.to_string()))?,
        );
        page.page
            .goto(url)
            .await
            .map_err(|e| navigation(e.to_string()))?;
        Ok(page)
    }
}

/// A tab that is closed when the guard goes away.
///
/// Callers close it explicitly on the normal path. A fetch future dropped by a
/// timeout still owns the guard, so `Drop` closes the tab in the background.
struct OpenPage {
    page: Page,
    closed: bool,
}

impl OpenPage {
    fn new(page: Page) -> Self {
        Self {
            page,
            closed: false,
        }
    }

    async fn close(mut self) {
        self.closed = true;
        close_page(self.page.clone()).await;
    }
}

impl Drop for OpenPage {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("closing abandoned browser page");
                handle.spawn(close_page(self.page.clone()));
            }
            Err(_) => warn!("no runtime to close abandoned browser page"),
        }
    }
}

async fn close_page(page: Page) {
    if let Err(error) = page.close().await {
        warn!(error = %error, "failed to close browser page");
    }
}

#[async_trait]
impl PageRenderer for ChromiumBrowser {
    #[instrument(skip(self))]
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, BrowserError> {
        let work = async {
            let page = self.open(url).await?;
            let html = page.page.content().await.map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            });
            page.close().await;
            html
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| BrowserError::Timeout {
                url: url.to_string(),
                timeout_secs: timeout.as_secs(),
            })?
    }
}

#[async_trait]
impl BrowserFetcher for ChromiumBrowser {
    #[instrument(skip(self))]
    async fn fetch_via_browser(&self, url: &str) -> Result<Vec<u8>, BrowserError> {
        let fetch_error = |message: String| BrowserError::Fetch {
            url: url.to_string(),
            message,
        };

        let page = self.open(url).await?;
        let target = serde_json::to_string(url).map_err(|e| fetch_error(e.to_string()))?;
        let params = EvaluateParams::builder()
            .expression(format!("{FETCH_AS_BASE64}({target})"))
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(fetch_error)?;

        let evaluated = page.page.evaluate_expression(params).await;
        page.close().await;

        let encoded: String = evaluated
            .map_err(|e| fetch_error(e.to_string()))?
            .into_value()
            .map_err(|e| fetch_error(format!("unexpected script result: {e:?}")))?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| fetch_error(format!("invalid base64 from page: {e}")))?;

        debug!(bytes = bytes.len(), "asset fetched in browser");
        Ok(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_renders_data_page() {
        let browser = ChromiumBrowser::launch()
            .await
            .expect("failed to launch browser");
        let html = browser
            .render("data:text/html,<img src='x.png'>", Duration::from_secs(20))
            .await
            .expect("render failed");
        assert!(html.contains("x.png"));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_timed_out_fetch_closes_its_page() {
        // Accepts connections and never answers, so navigation hangs.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind listener");
        let url = format!("http://{}/slow.png", listener.local_addr().expect("no addr"));
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let browser = ChromiumBrowser::launch()
            .await
            .expect("failed to launch browser");
        let baseline = browser.browser.pages().await.expect("pages").len();

        let fetched =
            tokio::time::timeout(Duration::from_secs(3), browser.fetch_via_browser(&url)).await;
        assert!(fetched.is_err(), "fetch should have timed out");

        tokio::time::sleep(Duration::from_secs(1)).await;
        let remaining = browser.browser.pages().await.expect("pages").len();
        assert_eq!(remaining, baseline);
    }
}
