use thiserror::Error;

use crate::PartResult;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Boxed error carried as the source of backend failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while orchestrating an upload.
///
/// Every variant is terminal at the transfer level: callers never see a
/// partially committed object.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Storage backend unavailable: {message}")]
    BackendUnavailable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Failed to issue presigned part URLs: {message}")]
    PresignIssuanceFailed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Part {part_number} failed to upload: {last_error}")]
    PartUploadFailed { part_number: u32, last_error: String },

    #[error("Some parts are missing or have incorrect ETags: {}", format_parts(.parts))]
    MissingOrMismatchedParts { parts: Vec<PartResult> },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Upload API returned {status} ({name}): {message}")]
    Api {
        status: u16,
        name: String,
        message: String,
    },

    #[error("Upload API request failed: {message}")]
    Transport { message: String },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

fn format_parts(parts: &[PartResult]) -> String {
    parts
        .iter()
        .map(|p| format!("#{} {}", p.part_number, p.integrity_tag))
        .collect::<Vec<_>>()
        .join(", ")
}

impl UploadError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BackendUnavailable {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Create a backend error from a plain message
    pub fn backend_message<S: Into<String>>(message: S) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a presign failure from a plain message
    pub fn presign_failed<S: Into<String>>(message: S) -> Self {
        Self::PresignIssuanceFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a part upload failure
    pub fn part_failed<S: Into<String>>(part_number: u32, last_error: S) -> Self {
        Self::PartUploadFailed {
            part_number,
            last_error: last_error.into(),
        }
    }

    /// Re-label a backend failure as a presign issuance failure.
    pub(crate) fn into_presign_failure(self) -> Self {
        match self {
            Self::BackendUnavailable { message, source } => {
                Self::PresignIssuanceFailed { message, source }
            }
            other => other,
        }
    }

    /// Whether the error was caused by the caller rather than the backend
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Invalid { .. } | Self::MissingOrMismatchedParts { .. }
        )
    }
}

/// Failure of a single PUT against a presigned URL
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("storage responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}
