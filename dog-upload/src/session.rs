use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{error, info, instrument, warn};

use crate::config::MAX_PART_NUMBER;
use crate::{
    DefaultKeyStrategy, FinalizeOutcome, FinalizeVerifier, InitiateResult, MultipartStore,
    ObjectKey, ObjectKeyStrategy, PartPlanner, PartResult, PresignedPartTarget, TransactionId,
    TransferMode, UploadConfig, UploadError, UploadResult,
};

/// Server side of the upload protocol.
///
/// Holds no per-upload state: the backend's multipart transaction is the
/// only stateful entity, so every call can land on any instance.
#[derive(Clone)]
pub struct UploadSession {
    store: Arc<dyn MultipartStore>,
    keys: Arc<dyn ObjectKeyStrategy>,
    verifier: FinalizeVerifier,
    planner: PartPlanner,
    config: UploadConfig,
}

impl UploadSession {
    /// Create a session over an already-constructed backend client
    pub fn new(store: Arc<dyn MultipartStore>, config: UploadConfig) -> Self {
        Self::with_key_strategy(store, DefaultKeyStrategy, config)
    }

    /// Create with custom key strategy
    pub fn with_key_strategy<K: ObjectKeyStrategy + 'static>(
        store: Arc<dyn MultipartStore>,
        keys: K,
        config: UploadConfig,
    ) -> Self {
        Self {
            verifier: FinalizeVerifier::new(Arc::clone(&store)),
            planner: PartPlanner::new(config.chunk_size),
            keys: Arc::new(keys),
            store,
            config,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Public address of a committed object
    pub fn object_url(&self, key: &ObjectKey) -> String {
        self.store.object_url(key)
    }

    /// Validate a file, derive its key and start the transfer.
    pub async fn initiate_for_file(
        &self,
        file_name: &str,
        total_size: u64,
        content_type: Option<&str>,
    ) -> UploadResult<InitiateResult> {
        if file_name.trim().is_empty() {
            return Err(UploadError::invalid("fileName is required"));
        }
        self.config.validate_file(total_size, content_type)?;

        let key = self.keys.object_key(&self.config.key_prefix, file_name);
        self.initiate(key, total_size, content_type).await
    }

    /// Start the transfer of `total_size` bytes to `key`.
    ///
    /// Small files get a presigned PUT; larger ones open a multipart
    /// transaction. Backend failures are returned, not retried.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn initiate(
        &self,
        key: ObjectKey,
        total_size: u64,
        content_type: Option<&str>,
    ) -> UploadResult<InitiateResult> {
        let content_type = self.config.content_type_for(content_type);

        match self.planner.mode_for(total_size) {
            TransferMode::SinglePart => {
                info!(size = total_size, "Initiating single-part upload");
                let url = self
                    .store
                    .presign_put(&key, content_type, self.config.presign_expiry)
                    .await
                    .inspect_err(|e| error!("Error initiating single-part upload: {}", e))?;

                Ok(InitiateResult::SinglePart {
                    object_key: key,
                    target: PresignedPartTarget::new(1, url, self.expires_at()),
                })
            }
            TransferMode::Multipart => {
                info!(size = total_size, "Initiating multipart upload");
                let transaction_id = self
                    .store
                    .create_multipart(&key, content_type)
                    .await
                    .inspect_err(|e| error!("Error initiating multipart upload: {}", e))?;

                info!(upload_id = %transaction_id, "Multipart upload initiated");
                Ok(InitiateResult::Multipart {
                    object_key: key,
                    transaction_id,
                })
            }
        }
    }

    /// Issue one presigned write capability per requested part.
    ///
    /// Every URL is signed concurrently; if any one fails the whole batch
    /// fails with `PresignIssuanceFailed`.
    #[instrument(skip_all, fields(key = %key, upload_id = %transaction_id, count = part_numbers.len()))]
    pub async fn get_part_targets(
        &self,
        transaction_id: &TransactionId,
        key: &ObjectKey,
        part_numbers: &[u32],
    ) -> UploadResult<Vec<PresignedPartTarget>> {
        validate_part_numbers(part_numbers)?;

        let expires_at = self.expires_at();
        let targets = try_join_all(part_numbers.iter().map(|&part_number| async move {
            let url = self
                .store
                .presign_part(key, transaction_id, part_number, self.config.presign_expiry)
                .await?;
            Ok::<_, UploadError>(PresignedPartTarget::new(part_number, url, expires_at))
        }))
        .await
        .map_err(|e| {
            error!("Error generating presigned URLs: {}", e);
            e.into_presign_failure()
        })?;

        info!("Generated presigned URLs");
        Ok(targets)
    }

    /// Verify the submitted parts against the backend, then commit.
    #[instrument(skip_all, fields(key = %key, upload_id = %transaction_id, parts = parts.len()))]
    pub async fn finalize(
        &self,
        transaction_id: &TransactionId,
        key: &ObjectKey,
        parts: &[PartResult],
    ) -> UploadResult<FinalizeOutcome> {
        if parts.is_empty() {
            return Err(UploadError::invalid("parts must not be empty"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = parts.iter().find(|p| !seen.insert(p.part_number)) {
            return Err(UploadError::invalid(format!(
                "Duplicate part number {}",
                dup.part_number
            )));
        }

        self.verifier.finalize(transaction_id, key, parts).await
    }

    /// Discard an incomplete transaction and the parts stored under it.
    #[instrument(skip_all, fields(key = %key, upload_id = %transaction_id))]
    pub async fn abort(&self, transaction_id: &TransactionId, key: &ObjectKey) -> UploadResult<()> {
        self.store
            .abort_multipart(key, transaction_id)
            .await
            .inspect_err(|e| warn!("Error aborting multipart upload: {}", e))?;
        info!("Multipart upload aborted");
        Ok(())
    }

    fn expires_at(&self) -> i64 {
        chrono::Utc::now().timestamp() + self.config.presign_expiry.as_secs() as i64
    }
}

fn validate_part_numbers(part_numbers: &[u32]) -> UploadResult<()> {
    if part_numbers.is_empty() {
        return Err(UploadError::invalid("partNumbers must not be empty"));
    }
    if let Some(bad) = part_numbers
        .iter()
        .find(|&&n| n == 0 || n > MAX_PART_NUMBER)
    {
        return Err(UploadError::invalid(format!(
            "Invalid part number: {} (must be 1-{})",
            bad, MAX_PART_NUMBER
        )));
    }
    Ok(())
}
