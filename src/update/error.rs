//! Error type shared by every stage of the update pipeline

use super::session::SessionState;

/// Coarse classification used by observers to pick a message/retry affordance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ManifestFetch,
    NoQualifyingAsset,
    Download,
    Extraction,
    PayloadNotFound,
    Launch,
    SessionBusy,
    InvalidPlan,
    Other,
}

/// Custom error type for update operations
#[derive(Debug)]
pub enum UpdateError {
    /// Release manifest could not be fetched or parsed
    ManifestFetch { url: String, reason: String },
    /// No asset with the requested name/rules exists in the release
    NoQualifyingAsset { name: String },
    /// Transfer failed; `offset` is the number of bytes written before the failure
    Download {
        url: String,
        offset: Option<u64>,
        reason: String,
    },
    /// Archive is corrupt or in an unsupported format
    Extraction { archive: String, reason: String },
    /// Located payload does not contain the expected files
    PayloadNotFound { path: String, expected: String },
    /// External installer failed to start
    Launch { reason: String },
    /// Another check/download is in flight
    SessionBusy { state: SessionState },
    /// Swap plan failed validation against the running executable
    InvalidPlan { reason: String },
    /// Generic error with context
    Other { context: String, reason: String },
}

impl UpdateError {
    pub fn other(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        UpdateError::Other {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::ManifestFetch { .. } => ErrorKind::ManifestFetch,
            UpdateError::NoQualifyingAsset { .. } => ErrorKind::NoQualifyingAsset,
            UpdateError::Download { .. } => ErrorKind::Download,
            UpdateError::Extraction { .. } => ErrorKind::Extraction,
            UpdateError::PayloadNotFound { .. } => ErrorKind::PayloadNotFound,
            UpdateError::Launch { .. } => ErrorKind::Launch,
            UpdateError::SessionBusy { .. } => ErrorKind::SessionBusy,
            UpdateError::InvalidPlan { .. } => ErrorKind::InvalidPlan,
            UpdateError::Other { .. } => ErrorKind::Other,
        }
    }
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateError::ManifestFetch { url, reason } => {
                write!(f, "Failed to fetch release info from {}: {}", url, reason)
            }
            UpdateError::NoQualifyingAsset { name } => {
                write!(f, "No installable asset found: {}", name)
            }
            UpdateError::Download { url, offset, reason } => match offset {
                Some(offset) => write!(
                    f,
                    "Download of {} failed after {} bytes: {}",
                    url, offset, reason
                ),
                None => write!(f, "Download of {} failed: {}", url, reason),
            },
            UpdateError::Extraction { archive, reason } => {
                write!(f, "Failed to extract '{}': {}", archive, reason)
            }
            UpdateError::PayloadNotFound { path, expected } => {
                write!(f, "Update payload at '{}' is missing {}", path, expected)
            }
            UpdateError::Launch { reason } => {
                write!(f, "Failed to start update installer: {}", reason)
            }
            UpdateError::SessionBusy { state } => {
                write!(f, "Update session busy ({})", state)
            }
            UpdateError::InvalidPlan { reason } => {
                write!(f, "Refusing to run update plan: {}", reason)
            }
            UpdateError::Other { context, reason } => {
                write!(f, "{}: {}", context, reason)
            }
        }
    }
}

impl std::error::Error for UpdateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_error_mentions_url_and_offset() {
        let err = UpdateError::Download {
            url: "https://example.invalid/Spark.zip".to_string(),
            offset: Some(4096),
            reason: "connection reset".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("https://example.invalid/Spark.zip"));
        assert!(msg.contains("4096"));
        assert_eq!(err.kind(), ErrorKind::Download);
    }

    #[test]
    fn busy_error_reports_state() {
        let err = UpdateError::SessionBusy {
            state: SessionState::Downloading,
        };
        assert!(err.to_string().contains("Downloading"));
        assert_eq!(err.kind(), ErrorKind::SessionBusy);
    }
}
