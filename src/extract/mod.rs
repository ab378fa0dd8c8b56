//! Asset URL extraction from rendered page markup.
//!
//! [`HtmlAssetExtractor`] walks the document with `scraper` selectors and
//! returns absolute asset URLs in first-seen order. Full-resolution image links
//! (`<a href="...jpg">`) come first; `<img>` candidates that look like
//! thumbnails of an already-linked image are dropped.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use crate::download::is_data_uri;

/// Which assets to collect from a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MediaKind {
    /// Images only.
    #[default]
    Image,
    /// Videos only.
    Video,
    /// Images and videos.
    All,
}

impl MediaKind {
    fn images(self) -> bool {
        matches!(self, Self::Image | Self::All)
    }

    fn videos(self) -> bool {
        matches!(self, Self::Video | Self::All)
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" | "images" => Ok(Self::Image),
            "video" | "videos" => Ok(Self::Video),
            "all" => Ok(Self::All),
            other => Err(format!(
                "invalid media kind '{other}': expected image, video or all"
            )),
        }
    }
}

/// Finds downloadable asset URLs in page markup.
pub trait AssetExtractor: Send + Sync {
    /// Returns absolute asset URLs found in `html`, relative ones resolved
    /// against `base_url`, without duplicates.
    fn extract(&self, html: &str, base_url: &str, kind: MediaKind) -> Vec<String>;
}

/// Link targets treated as full-resolution images.
const LINKED_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".bmp", ".tiff"];

/// Lazy-loading attributes checked after `src`.
const IMG_SOURCE_ATTRS: &[&str] = &["src", "data-src", "data-lazy", "data-original"];

macro_rules! selector {
    ($name:ident, $css:literal) => {
        #[allow(clippy::expect_used)]
        static $name: LazyLock<Selector> = LazyLock::new(|| {
            Selector::parse($css).expect("static selector is valid") // Static pattern, safe to panic
        });
    };
}

selector!(LINK_SELECTOR, "a[href]");
selector!(IMG_SELECTOR, "img");
selector!(SOURCE_SELECTOR, "source");
selector!(VIDEO_SELECTOR, "video[src]");

/// [`AssetExtractor`] over static HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlAssetExtractor;

impl AssetExtractor for HtmlAssetExtractor {
    #[instrument(skip(self, html), fields(html_len = html.len()))]
    fn extract(&self, html: &str, base_url: &str, kind: MediaKind) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut found = FoundUrls::new(Url::parse(base_url).ok());

        if kind.images() {
            collect_images(&document, &mut found);
        }
        if kind.videos() {
            collect_videos(&document, &mut found);
        }

        debug!(count = found.urls.len(), "assets extracted");
        found.urls
    }
}

fn collect_images(document: &Html, found: &mut FoundUrls) {
    for link in document.select(&LINK_SELECTOR) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let lower = href.trim().to_ascii_lowercase();
        if LINKED_IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            if let Some(url) = found.push(href) {
                found.full_res_names.push(file_name(&url).to_ascii_lowercase());
            }
        }
    }

    for img in document.select(&IMG_SELECTOR) {
        for attr in IMG_SOURCE_ATTRS {
            if let Some(value) = img.value().attr(attr) {
                found.push_unless_linked(value);
            }
        }
        for candidate in srcset_candidates(img, "srcset") {
            found.push_unless_linked(candidate);
        }
    }

    for source in document.select(&SOURCE_SELECTOR) {
        for candidate in srcset_candidates(source, "srcset") {
            found.push_unless_linked(candidate);
        }
    }
}

fn collect_videos(document: &Html, found: &mut FoundUrls) {
    for video in document.select(&VIDEO_SELECTOR) {
        if let Some(src) = video.value().attr("src") {
            found.push(src);
        }
    }
    for source in document.select(&SOURCE_SELECTOR) {
        let is_video = source
            .value()
            .attr("type")
            .is_some_and(|t| t.trim().starts_with("video/"));
        if let (true, Some(src)) = (is_video, source.value().attr("src")) {
            found.push(src);
        }
    }
}

/// URL part of each `srcset` entry (`url [descriptor], ...`).
fn srcset_candidates<'a>(element: ElementRef<'a>, attr: &str) -> impl Iterator<Item = &'a str> {
    element
        .value()
        .attr(attr)
        .into_iter()
        .flat_map(parse_srcset)
}

/// Splits a `srcset` value into candidate URLs.
///
/// A `data:` candidate carries commas of its own, so it runs to the first
/// whitespace; other candidates also stop at a comma.
fn parse_srcset(srcset: &str) -> Vec<&str> {
    let mut urls = Vec::new();
    let mut rest = srcset;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            return urls;
        }
        let end = if is_data_uri(rest) {
            rest.find(char::is_whitespace)
        } else {
            rest.find(|c: char| c.is_whitespace() || c == ',')
        }
        .unwrap_or(rest.len());
        let url = rest[..end].trim_end_matches(',');
        if !url.is_empty() {
            urls.push(url);
        }
        // Skip the descriptor up to the next entry.
        rest = &rest[end..];
        let descriptor_end = if rest.starts_with(',') {
            0
        } else {
            rest.find(',').unwrap_or(rest.len())
        };
        rest = &rest[descriptor_end..];
    }
}

/// Last path segment of a URL-ish string.
fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Ordered, de-duplicated URL accumulator.
struct FoundUrls {
    base: Option<Url>,
    seen: HashSet<String>,
    urls: Vec<String>,
    full_res_names: Vec<String>,
}

impl FoundUrls {
    fn new(base: Option<Url>) -> Self {
        Self {
            base,
            seen: HashSet::new(),
            urls: Vec::new(),
            full_res_names: Vec::new(),
        }
    }

    fn resolve(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if is_data_uri(raw) {
            return Some(raw.to_string());
        }
        match &self.base {
            Some(base) => base.join(raw).ok().map(String::from),
            None => Url::parse(raw).ok().map(String::from),
        }
    }

    /// Adds `raw` if new; returns the resolved URL when it was added.
    fn push(&mut self, raw: &str) -> Option<String> {
        let url = self.resolve(raw)?;
        if !self.seen.insert(url.clone()) {
            return None;
        }
        self.urls.push(url.clone());
        Some(url)
    }

    /// Adds an `<img>` candidate unless a full-resolution link already covers it.
    fn push_unless_linked(&mut self, raw: &str) {
        let Some(url) = self.resolve(raw) else {
            return;
        };
        if !is_data_uri(&url) && self.is_linked_thumbnail(&url) {
            debug!(url = %url, "skipping thumbnail of linked image");
            return;
        }
        self.push(&url);
    }

    fn is_linked_thumbnail(&self, url: &str) -> bool {
        let name = file_name(url).to_ascii_lowercase();
        let stem = name.rsplit_once('.').map_or(name.as_str(), |(stem, _)| stem);
        !stem.is_empty() && self.full_res_names.iter().any(|full| full.contains(stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com/gallery/page.html";

    fn extract(html: &str, kind: MediaKind) -> Vec<String> {
        HtmlAssetExtractor.extract(html, BASE, kind)
    }

    #[test]
    fn test_img_attributes_and_srcset_resolved() {
        let html = r#"
            <img src="a.jpg">
            <img data-src="/lazy/b.png" data-original="https://cdn.example.net/c.webp">
            <img srcset="d-320.jpg 320w, d-640.jpg 640w">
            <picture><source srcset="e.avif 1x, e@2x.avif 2x"></picture>
        "#;
        assert_eq!(
            extract(html, MediaKind::Image),
            vec![
                "https://example.com/gallery/a.jpg",
                "https://example.com/lazy/b.png",
                "https://cdn.example.net/c.webp",
                "https://example.com/gallery/d-320.jpg",
                "https://example.com/gallery/d-640.jpg",
                "https://example.com/gallery/e.avif",
                "https://example.com/gallery/e@2x.avif",
            ]
        );
    }

    #[test]
    fn test_srcset_keeps_inline_data_uri_whole() {
        let html = r#"<img srcset="data:image/png;base64,iVBORw0KGgo= 1x, big.png 2x">"#;
        assert_eq!(
            extract(html, MediaKind::Image),
            vec![
                "data:image/png;base64,iVBORw0KGgo=",
                "https://example.com/gallery/big.png",
            ]
        );
    }

    #[test]
    fn test_parse_srcset_entries() {
        assert_eq!(parse_srcset("a.jpg 1x,b.jpg 2x"), vec!["a.jpg", "b.jpg"]);
        assert_eq!(parse_srcset(" a.jpg, b.jpg "), vec!["a.jpg", "b.jpg"]);
        assert_eq!(
            parse_srcset("data:image/gif;base64,R0lGOD=,"),
            vec!["data:image/gif;base64,R0lGOD="]
        );
        assert!(parse_srcset(" , ").is_empty());
    }

    #[test]
    fn test_full_res_links_first_and_thumbnails_skipped() {
        let html = r#"
            <img src="/thumbs/photo1.jpg">
            <a href="/full/photo1_large.JPG"><img src="/thumbs/photo1.jpg"></a>
            <a href="/about.html">about</a>
            <img src="/thumbs/other.png">
        "#;
        assert_eq!(
            extract(html, MediaKind::Image),
            vec![
                "https://example.com/full/photo1_large.JPG",
                "https://example.com/thumbs/other.png",
            ]
        );
    }

    #[test]
    fn test_duplicates_removed_preserving_order() {
        let html = r#"<img src="x.gif"><img src="y.gif"><img src="./x.gif">"#;
        assert_eq!(
            extract(html, MediaKind::Image),
            vec![
                "https://example.com/gallery/x.gif",
                "https://example.com/gallery/y.gif",
            ]
        );
    }

    #[test]
    fn test_data_uris_kept_verbatim() {
        let html = r#"<img src="data:image/png;base64,iVBORw0KGgo=">"#;
        assert_eq!(
            extract(html, MediaKind::Image),
            vec!["data:image/png;base64,iVBORw0KGgo="]
        );
    }

    #[test]
    fn test_videos_from_video_and_typed_source() {
        let html = r#"
            <video src="clip.mp4"></video>
            <video><source src="/v/clip.webm" type="video/webm"><source src="audio.ogg" type="audio/ogg"></video>
            <img src="poster.jpg">
        "#;
        assert_eq!(
            extract(html, MediaKind::Video),
            vec![
                "https://example.com/gallery/clip.mp4",
                "https://example.com/v/clip.webm",
            ]
        );
        assert_eq!(extract(html, MediaKind::All).len(), 3);
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!("images".parse::<MediaKind>(), Ok(MediaKind::Image));
        assert_eq!("Video".parse::<MediaKind>(), Ok(MediaKind::Video));
        assert_eq!("all".parse::<MediaKind>(), Ok(MediaKind::All));
        assert!("audio".parse::<MediaKind>().is_err());
    }

    #[test]
    fn test_invalid_base_keeps_only_absolute_urls() {
        let urls = HtmlAssetExtractor.extract(
            r#"<img src="rel.jpg"><img src="https://a.example/abs.jpg">"#,
            "not a url",
            MediaKind::Image,
        );
        assert_eq!(urls, vec!["https://a.example/abs.jpg"]);
    }
}
