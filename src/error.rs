// Error taxonomy shared by every module of the uploader.
// - Fatal kinds (`Configuration`, `Auth`) abort the whole run.
// - `Transient` is retried with bounded backoff.
// - The rest fail a single file (or only its archival) and the run moves on.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    /// Invalid or incomplete run configuration, detected before any upload.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The platform rejected the API key (HTTP 401/403).
    #[error("platform rejected the API key ({status}): {body}")]
    Auth { status: u16, body: String },

    /// 5xx, 429, connection failure or timeout.
    #[error("transient platform failure: {0}")]
    Transient(String),

    /// Any other 4xx.
    #[error("request rejected ({status}): {body}")]
    Request { status: u16, body: String },

    /// The platform answered with a body we could not make sense of.
    #[error("unexpected response from platform: {0}")]
    Protocol(String),

    /// Moving a processed file into the archive failed.
    #[error("could not archive '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local filesystem failure outside archiving, including a scan file
    /// that could not be read for upload.
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UploadError {
    /// Errors that must abort the run instead of failing a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UploadError::Configuration(_) | UploadError::Auth { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UploadError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(UploadError::Configuration("x".into()).is_fatal());
        assert!(UploadError::Auth {
            status: 401,
            body: String::new()
        }
        .is_fatal());
        assert!(!UploadError::Transient("timeout".into()).is_fatal());
        assert!(!UploadError::Protocol("bad json".into()).is_fatal());
        assert!(!UploadError::Request {
            status: 404,
            body: String::new()
        }
        .is_fatal());
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(UploadError::Transient("503".into()).is_transient());
        assert!(!UploadError::Configuration("x".into()).is_transient());
    }
}
