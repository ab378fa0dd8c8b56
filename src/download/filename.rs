//! Content classification and file naming for persisted assets.
//!
//! Picks a file extension for a fetched body (URL suffix first, then the
//! declared content type), decodes inline `data:image/...` URIs, and derives
//! the batch file names `file_<token>_<index><ext>`.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use regex::Regex;
use url::Url;

use super::DownloadError;

/// Inline image URI: `data:image/<format>;base64,<payload>`.
#[allow(clippy::expect_used)]
static DATA_URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:image/(\w+);base64,(.*)$").expect("data URI regex is valid") // Static pattern, safe to panic
});

/// Extensions accepted from a URL path without consulting the content type.
const KNOWN_MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".tif", ".tiff", ".svg", ".avif", ".mp4",
    ".webm", ".ogv", ".mov", ".m4v",
];

/// Longest URL suffix (including the dot) considered a real extension.
const MAX_URL_EXTENSION_LEN: usize = 5;

/// Extension used when nothing better is known.
pub const FALLBACK_EXTENSION: &str = ".bin";

/// A decoded inline image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    /// Format name from the URI, e.g. `png`.
    pub format: String,
    /// Decoded payload.
    pub bytes: Vec<u8>,
}

impl InlineImage {
    /// File extension for the decoded payload (`.` + format).
    #[must_use]
    pub fn extension(&self) -> String {
        format!(".{}", self.format.to_lowercase())
    }
}

/// Returns true when `url` is an inline `data:` URI rather than a network URL.
#[must_use]
pub fn is_data_uri(url: &str) -> bool {
    url.trim_start().get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"))
}

/// Decodes a `data:image/<fmt>;base64,<payload>` URI.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidData`] when the URI does not match the
/// pattern or the payload is not valid base64.
pub fn parse_data_uri(uri: &str) -> Result<InlineImage, DownloadError> {
    let captures = DATA_URI_PATTERN
        .captures(uri.trim())
        .ok_or_else(|| DownloadError::invalid_data("expected data:image/<format>;base64,<payload>"))?;

    let format = captures[1].to_string();
    let payload: String = captures[2].chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| DownloadError::invalid_data(format!("invalid base64 payload: {e}")))?;

    Ok(InlineImage { format, bytes })
}

/// Extension from the URL's last path segment, if short and recognized.
pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = last_segment[dot_index..].to_lowercase();
    if ext.len() > MAX_URL_EXTENSION_LEN || !KNOWN_MEDIA_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some(ext)
}

/// Guess file extension from a Content-Type header.
pub(crate) fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "image/bmp" => ".bmp",
        "image/tiff" => ".tiff",
        "image/svg+xml" => ".svg",
        "image/avif" => ".avif",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "video/ogg" => ".ogv",
        "video/quicktime" => ".mov",
        _ => FALLBACK_EXTENSION,
    }
}

/// Picks the extension for a fetched asset.
///
/// The URL suffix wins when recognized; otherwise the declared content type is
/// mapped; otherwise [`FALLBACK_EXTENSION`].
#[must_use]
pub fn classify_extension(url: &str, content_type: Option<&str>) -> String {
    extension_from_url(url).unwrap_or_else(|| {
        content_type
            .map_or(FALLBACK_EXTENSION, extension_from_content_type)
            .to_string()
    })
}

/// Extension guessed from leading magic bytes, for bodies without a content type.
pub(crate) fn extension_from_signature(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some(".png"),
        [0xFF, 0xD8, 0xFF, ..] => Some(".jpg"),
        [b'G', b'I', b'F', b'8', ..] => Some(".gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(".webp"),
        [b'B', b'M', ..] => Some(".bmp"),
        [0x1A, 0x45, 0xDF, 0xA3, ..] => Some(".webm"),
        [_, _, _, _, b'f', b't', b'y', b'p', b'q', b't', ..] => Some(".mov"),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some(".mp4"),
        _ => None,
    }
}

/// Random hex component shared by all files of one batch.
#[must_use]
pub fn batch_token() -> String {
    let bytes: [u8; 4] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// File name for the asset at `index` in a batch.
///
/// ```
/// use mediafetch_core::download::batch_file_name;
///
/// assert_eq!(batch_file_name("0a1b2c3d", 7, ".png"), "file_0a1b2c3d_007.png");
/// ```
#[must_use]
pub fn batch_file_name(token: &str, index: usize, extension: &str) -> String {
    format!("file_{token}_{index:03}{extension}")
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Resolves a unique file path, adding `_1`, `_2`, ... before the extension
/// when the name is taken.
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.trim_matches('_').is_empty() {
            format!("download{FALLBACK_EXTENSION}")
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);

    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let new_path = dir.join(format!("{stem}_{i}{ext}"));
        if !new_path.exists() {
            return new_path;
        }
    }

    dir.join(format!("{stem}_{}{ext}", batch_token()))
}

/// File name derived from the URL's last path segment (percent-decoded), or
/// `download` when the path is empty.
pub(crate) fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| !last.is_empty())
        .map_or_else(
            || "download".to_string(),
            |last| {
                let decoded = urlencoding::decode(last)
                    .map_or_else(|_| last.to_string(), std::borrow::Cow::into_owned);
                sanitize_filename(&decoded)
            },
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ==================== Extension Classification Tests ====================

    #[test]
    fn test_extension_from_url_recognized() {
        assert_eq!(
            extension_from_url("https://cdn.example.com/a/b/photo.JPG?x=1"),
            Some(".jpg".to_string())
        );
        assert_eq!(
            extension_from_url("https://cdn.example.com/clip.webm"),
            Some(".webm".to_string())
        );
    }

    #[test]
    fn test_extension_from_url_unrecognized_or_long() {
        assert_eq!(extension_from_url("https://example.com/image.php"), None);
        assert_eq!(extension_from_url("https://example.com/file.download"), None);
        assert_eq!(extension_from_url("https://example.com/noext"), None);
    }

    #[test]
    fn test_extension_from_content_type_mapping() {
        let cases = [
            ("image/jpeg", ".jpg"),
            ("image/png", ".png"),
            ("image/webp", ".webp"),
            ("image/gif", ".gif"),
            ("image/bmp", ".bmp"),
            ("image/tiff", ".tiff"),
            ("video/mp4", ".mp4"),
            ("video/webm", ".webm"),
            ("video/ogg", ".ogv"),
            ("video/quicktime", ".mov"),
        ];
        for (content_type, expected) in cases {
            assert_eq!(extension_from_content_type(content_type), expected, "{content_type}");
        }
    }

    #[test]
    fn test_extension_from_content_type_strips_parameters_and_case() {
        assert_eq!(extension_from_content_type("Image/PNG; charset=binary"), ".png");
    }

    #[test]
    fn test_extension_from_content_type_unknown_falls_back_to_bin() {
        assert_eq!(extension_from_content_type("text/html"), ".bin");
        assert_eq!(extension_from_content_type(""), ".bin");
    }

    #[test]
    fn test_classify_extension_prefers_url_suffix() {
        assert_eq!(
            classify_extension("https://example.com/a.png", Some("image/jpeg")),
            ".png"
        );
        assert_eq!(
            classify_extension("https://example.com/render?id=4", Some("image/webp")),
            ".webp"
        );
        assert_eq!(classify_extension("https://example.com/render", None), ".bin");
    }

    #[test]
    fn test_extension_from_signature() {
        assert_eq!(extension_from_signature(b"\x89PNG\r\n\x1a\n"), Some(".png"));
        assert_eq!(extension_from_signature(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(".jpg"));
        assert_eq!(extension_from_signature(b"RIFF\0\0\0\0WEBPVP8 "), Some(".webp"));
        assert_eq!(extension_from_signature(b"\0\0\0\x18ftypmp42"), Some(".mp4"));
        assert_eq!(extension_from_signature(b"\0\0\0\x14ftypqt  "), Some(".mov"));
        assert_eq!(extension_from_signature(b"<html>"), None);
    }

    // ==================== Data URI Tests ====================

    #[test]
    fn test_is_data_uri() {
        assert!(is_data_uri("data:image/png;base64,AAAA"));
        assert!(is_data_uri("DATA:image/png;base64,AAAA"));
        assert!(!is_data_uri("https://example.com/data:x"));
        assert!(!is_data_uri("dat"));
    }

    #[test]
    fn test_parse_data_uri_valid_png() {
        let image = parse_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(image.format, "png");
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.extension(), ".png");
    }

    #[test]
    fn test_parse_data_uri_non_image_rejected() {
        let err = parse_data_uri("data:text/plain;base64,aGVsbG8=").unwrap_err();
        assert!(matches!(err, DownloadError::InvalidData { .. }));
    }

    #[test]
    fn test_parse_data_uri_missing_base64_marker_rejected() {
        let err = parse_data_uri("data:image/png,hello").unwrap_err();
        assert!(matches!(err, DownloadError::InvalidData { .. }));
    }

    #[test]
    fn test_parse_data_uri_bad_payload_rejected() {
        let err = parse_data_uri("data:image/gif;base64,@@@not-base64@@@").unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    // ==================== Naming Tests ====================

    #[test]
    fn test_batch_token_is_eight_hex_chars() {
        let token = batch_token();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_batch_file_name_pads_index() {
        assert_eq!(batch_file_name("deadbeef", 0, ".jpg"), "file_deadbeef_000.jpg");
        assert_eq!(batch_file_name("deadbeef", 1234, ".bin"), "file_deadbeef_1234.bin");
    }

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("a/b:c.png"), "a_b_c.png");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_resolve_unique_path_no_conflict() {
        let dir = TempDir::new().unwrap();
        let path = resolve_unique_path(dir.path(), "photo.jpg");
        assert_eq!(path, dir.path().join("photo.jpg"));
    }

    #[test]
    fn test_resolve_unique_path_with_conflict_uses_suffix_one() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("photo.jpg"), b"x").unwrap();

        let path = resolve_unique_path(dir.path(), "photo.jpg");
        assert_eq!(path, dir.path().join("photo_1.jpg"));

        std::fs::write(&path, b"x").unwrap();
        let path = resolve_unique_path(dir.path(), "photo.jpg");
        assert_eq!(path, dir.path().join("photo_2.jpg"));
    }

    #[test]
    fn test_filename_from_url_decodes_last_segment() {
        let url = Url::parse("https://example.com/gallery/my%20photo.jpg").unwrap();
        assert_eq!(filename_from_url(&url), "my photo.jpg");

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&url), "download");
    }
}
