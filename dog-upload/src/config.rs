use std::time::Duration;

use crate::{UploadError, UploadResult};

/// 5 MiB, the smallest part size S3 accepts for non-final parts.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Largest file accepted by default (100 MiB)
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Validity window of every presigned URL
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// Highest part number a multipart transaction may use
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Server-side configuration for upload sessions
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Fixed part size; files smaller than this go up as a single PUT
    pub chunk_size: u64,

    /// Absolute max size allowed for a single file (safety guard)
    pub max_file_bytes: u64,

    /// How long issued write capabilities stay valid
    pub presign_expiry: Duration,

    /// Prefix prepended to every generated object key
    pub key_prefix: String,

    /// MIME types accepted at initiate time
    pub accepted_content_types: Vec<String>,

    /// Content type recorded on the object when the caller declares none
    pub default_content_type: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            presign_expiry: DEFAULT_PRESIGN_EXPIRY,
            key_prefix: "uploads/".to_string(),
            accepted_content_types: vec!["application/pdf".to_string()],
            default_content_type: "application/pdf".to_string(),
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    pub fn with_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Replace the accepted MIME types. An empty list accepts anything.
    pub fn with_accepted_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_content_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    /// Resolve the content type for a file, falling back to the default.
    pub fn content_type_for<'a>(&'a self, declared: Option<&'a str>) -> &'a str {
        declared
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(self.default_content_type.as_str())
    }

    /// Reject files that are too large or of an unaccepted type.
    pub fn validate_file(&self, size: u64, content_type: Option<&str>) -> UploadResult<()> {
        if size > self.max_file_bytes {
            return Err(UploadError::invalid(format!(
                "File size {} exceeds maximum {}",
                size, self.max_file_bytes
            )));
        }

        let content_type = self.content_type_for(content_type);
        if !self.accepted_content_types.is_empty()
            && !self
                .accepted_content_types
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(content_type))
        {
            return Err(UploadError::invalid(format!(
                "Content type {} is not accepted",
                content_type
            )));
        }

        Ok(())
    }
}

/// Client-side rules for driving a transfer
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Part size used to slice the file; must match the server's
    pub chunk_size: u64,

    /// Total attempts per part, first try included
    pub max_attempts: u32,

    /// Delay between attempts. `None` retries immediately.
    pub retry_backoff: Option<Duration>,

    /// Upper bound on simultaneous part uploads
    pub part_concurrency: usize,

    /// Abort the backend transaction after a fatal part failure
    pub abort_on_failure: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: 3,
            retry_backoff: None,
            part_concurrency: 6,
            abort_on_failure: true,
        }
    }
}

impl TransferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Wait between attempts, growing linearly with the attempt number
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn with_part_concurrency(mut self, limit: usize) -> Self {
        self.part_concurrency = limit.max(1);
        self
    }

    /// Leave failed transactions for the backend's lifecycle rules
    pub fn without_abort(mut self) -> Self {
        self.abort_on_failure = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_accepts_pdf_up_to_limit() {
        let config = UploadConfig::default();
        assert!(config.validate_file(DEFAULT_MAX_FILE_BYTES, Some("application/pdf")).is_ok());
        assert!(config.validate_file(10, None).is_ok());
    }

    #[test]
    fn rejects_oversized_and_foreign_types() {
        let config = UploadConfig::default();
        let too_big = config.validate_file(DEFAULT_MAX_FILE_BYTES + 1, Some("application/pdf"));
        assert!(matches!(too_big, Err(UploadError::Invalid { .. })));

        let wrong_type = config.validate_file(10, Some("text/plain"));
        assert!(matches!(wrong_type, Err(UploadError::Invalid { .. })));
    }

    #[test]
    fn empty_accept_list_allows_any_type() {
        let config = UploadConfig::default().with_accepted_content_types(Vec::<String>::new());
        assert!(config.validate_file(10, Some("image/png")).is_ok());
    }
}
