//! Error taxonomy shared by the session, catalog and sync layers

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while talking to the platform or materializing videos
#[derive(Debug, Error)]
pub enum CoursyncError {
    /// The sign-in exchange failed or did not yield a user identity
    #[error("Sign-in failed: {0}")]
    Auth(String),

    /// An authenticated call was attempted after the session TTL elapsed
    #[error("Session expired, sign in again")]
    SessionExpired,

    /// Enrolled-topic or video-list retrieval failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The download response lacked a usable filename header
    #[error("Error parsing filename from response: {0}")]
    FilenameParse(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The batch was cancelled before this item acquired a slot
    #[error("Cancelled before the download started")]
    Cancelled,
}

impl CoursyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the distinct expired-session signal
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expired_is_distinguishable() {
        assert!(CoursyncError::SessionExpired.is_session_expired());
        assert!(!CoursyncError::Catalog("boom".to_string()).is_session_expired());
        assert!(!CoursyncError::Cancelled.is_session_expired());
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = CoursyncError::io(
            "/tmp/ml-003/lecture1.mp4",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("/tmp/ml-003/lecture1.mp4"));
        assert!(message.contains("denied"));
    }
}
