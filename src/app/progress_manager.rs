//! Progress UI for download runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mediafetch_core::BatchObserver;
use mediafetch_core::download::{DownloadOutcome, Task};
use url::Url;

/// Batch observer that drives an indicatif bar on stderr.
#[derive(Debug)]
pub(crate) struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchObserver for ProgressObserver {
    fn batch_started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn task_started(&self, task: &Task) {
        self.bar
            .set_message(format!("Downloading from {}...", host_label(&task.url)));
    }

    fn task_finished(&self, outcome: &DownloadOutcome) {
        if !outcome.is_success() {
            self.bar.println(format!("failed: {}", outcome.url));
        }
        self.bar.inc(1);
    }
}

fn host_label(url: &str) -> String {
    if url.starts_with("data:") {
        return "inline data".to_string();
    }
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(std::string::ToString::to_string))
        .unwrap_or_else(|| "batch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_label() {
        assert_eq!(host_label("https://cdn.example.com/a.jpg"), "cdn.example.com");
        assert_eq!(host_label("data:image/png;base64,AAAA"), "inline data");
        assert_eq!(host_label("not a url"), "batch");
    }

    #[test]
    fn test_observer_counts_finished_tasks() {
        let observer = ProgressObserver::new();
        observer.batch_started(2);
        observer.task_finished(&DownloadOutcome::failed(
            0,
            "https://e.com/a.jpg",
            1,
            mediafetch_core::ErrorClass::HttpClientError,
            "404",
        ));
        assert_eq!(observer.bar.position(), 1);
        assert_eq!(observer.bar.length(), Some(2));
        observer.finish();
    }
}
