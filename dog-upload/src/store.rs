use std::time::Duration;

use async_trait::async_trait;

use crate::{ObjectKey, RecordedPart, TransactionId, UploadResult};

/// Storage backend operations needed by the upload protocol.
///
/// Implementations report every failure as
/// [`UploadError::BackendUnavailable`](crate::UploadError::BackendUnavailable);
/// the session decides how to surface it.
#[async_trait]
pub trait MultipartStore: Send + Sync {
    /// Presign a single PUT of the whole object
    async fn presign_put(
        &self,
        key: &ObjectKey,
        content_type: &str,
        expires_in: Duration,
    ) -> UploadResult<String>;

    /// Open a multipart transaction for `key`
    async fn create_multipart(
        &self,
        key: &ObjectKey,
        content_type: &str,
    ) -> UploadResult<TransactionId>;

    /// Presign the upload of one part of an open transaction
    async fn presign_part(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
        part_number: u32,
        expires_in: Duration,
    ) -> UploadResult<String>;

    /// Every part the backend has durably recorded for the transaction
    async fn list_parts(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
    ) -> UploadResult<Vec<RecordedPart>>;

    /// Assemble the object from `parts`, in the order given
    async fn complete_multipart(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
        parts: Vec<CompletedPart>,
    ) -> UploadResult<CommitResult>;

    /// Discard the transaction and every part uploaded to it
    async fn abort_multipart(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
    ) -> UploadResult<()>;

    /// Public address of a committed object
    fn object_url(&self, key: &ObjectKey) -> String;
}

/// Part reference handed to the backend commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Result of a successful commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitResult {
    pub etag: Option<String>,
    pub location: Option<String>,
}

/// Strategy for naming uploaded objects
pub trait ObjectKeyStrategy: Send + Sync {
    /// Generate a fresh, collision-free key for a file
    fn object_key(&self, prefix: &str, file_name: &str) -> ObjectKey;
}

/// Default key strategy: `<prefix><uuid>-<unix millis>-<file name>`
#[derive(Debug, Clone)]
pub struct DefaultKeyStrategy;

impl ObjectKeyStrategy for DefaultKeyStrategy {
    fn object_key(&self, prefix: &str, file_name: &str) -> ObjectKey {
        let file_name: String = file_name
            .trim()
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();

        ObjectKey(format!(
            "{}{}-{}-{}",
            prefix,
            uuid::Uuid::new_v4(),
            chrono::Utc::now().timestamp_millis(),
            file_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_and_unique() {
        let a = DefaultKeyStrategy.object_key("uploads/", "report.pdf");
        let b = DefaultKeyStrategy.object_key("uploads/", "report.pdf");
        assert!(a.as_str().starts_with("uploads/"));
        assert!(a.as_str().ends_with("-report.pdf"));
        assert_ne!(a, b);
    }

    #[test]
    fn path_separators_do_not_nest_keys() {
        let key = DefaultKeyStrategy.object_key("uploads/", "../etc/passwd");
        assert_eq!(key.as_str().matches('/').count(), 1);
    }
}
