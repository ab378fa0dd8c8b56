use super::DownloadError;
use crate::download::ErrorClass;

/// Maps a task's last error onto the reported taxonomy.
pub(super) fn classify_error_class(error: &DownloadError) -> ErrorClass {
    match error {
        DownloadError::Network { .. } | DownloadError::Timeout { .. } => {
            ErrorClass::TransportError
        }
        DownloadError::HttpStatus { status, .. } => match status {
            403 => ErrorClass::HttpForbidden,
            429 => ErrorClass::HttpRateLimited,
            500..=599 => ErrorClass::HttpServerError,
            _ => ErrorClass::HttpClientError,
        },
        DownloadError::Io { .. } => ErrorClass::WriteError,
        DownloadError::InvalidUrl { .. } => ErrorClass::InvalidUrl,
        DownloadError::InvalidData { .. } => ErrorClass::InvalidData,
        DownloadError::Undersized { .. } => ErrorClass::UndersizedResponse,
        DownloadError::RenderTimeout { .. } => ErrorClass::RenderTimeout,
        DownloadError::Browser { .. } => ErrorClass::RenderFailed,
    }
}
