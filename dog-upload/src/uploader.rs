use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::{IntegrityTag, PartResult, PresignedPartTarget, TransportError, UploadError, UploadResult};

/// Content type of every multipart part PUT
pub const PART_CONTENT_TYPE: &str = "application/octet-stream";

/// Moves raw bytes to a presigned URL
#[async_trait]
pub trait PartTransport: Send + Sync {
    /// PUT `body` to `url`. Any non-2xx answer is an error.
    async fn put(&self, url: &str, content_type: &str, body: Bytes) -> Result<(), TransportError>;
}

/// How often, and how patiently, a part is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: None,
        }
    }
}

impl RetryPolicy {
    /// One attempt, no retry
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: None,
        }
    }

    /// Delay before attempt `attempt + 1`, growing linearly and capped
    fn delay_after(&self, attempt: u32) -> Option<Duration> {
        const MAX_DELAY: Duration = Duration::from_secs(30);
        self.backoff
            .map(|base| base.saturating_mul(attempt).min(MAX_DELAY))
    }
}

/// Uploads one part, retrying transport failures.
#[derive(Clone)]
pub struct PartUploader {
    transport: Arc<dyn PartTransport>,
    policy: RetryPolicy,
}

impl PartUploader {
    pub fn new(transport: Arc<dyn PartTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `bytes` to `target` and report the locally computed tag.
    ///
    /// The tag is hashed from the exact bytes sent, never taken from the
    /// transport's response.
    pub async fn upload(
        &self,
        target: &PresignedPartTarget,
        content_type: &str,
        bytes: Bytes,
    ) -> UploadResult<PartResult> {
        self.upload_with_policy(target, content_type, bytes, self.policy)
            .await
    }

    /// Like [`upload`](Self::upload) with a single attempt
    pub async fn upload_once(
        &self,
        target: &PresignedPartTarget,
        content_type: &str,
        bytes: Bytes,
    ) -> UploadResult<PartResult> {
        self.upload_with_policy(target, content_type, bytes, RetryPolicy::once())
            .await
    }

    async fn upload_with_policy(
        &self,
        target: &PresignedPartTarget,
        content_type: &str,
        bytes: Bytes,
        policy: RetryPolicy,
    ) -> UploadResult<PartResult> {
        let part_number = target.part_number;
        let tag = IntegrityTag::compute(&bytes);
        let attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!(part_number, attempt, size = bytes.len(), "Uploading part");

            // Bytes clones share the buffer
            match self
                .transport
                .put(&target.url, content_type, bytes.clone())
                .await
            {
                Ok(()) => {
                    debug!(part_number, tag = %tag, "Part uploaded");
                    return Ok(PartResult::new(part_number, tag));
                }
                Err(e) => {
                    warn!(part_number, attempt, error = %e, "Error uploading part");
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                if let Some(delay) = policy.delay_after(attempt) {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(UploadError::part_failed(
            part_number,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        ))
    }
}
