use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tracing::{error, info, warn};

use crate::uploader::PART_CONTENT_TYPE;
use crate::{
    FinalizeOutcome, FinalizeRequest, InitiateResult, ObjectKey, PartPlan, PartPlanner,
    PartResult, PartTransport, PartUploader, PresignedPartTarget, RetryPolicy, TransactionId,
    TransferConfig, TransferMode, TransferReceipt, UploadError, UploadResult, UploadSession,
    UploadTransfer,
};

/// The three-phase contract as seen from the client.
///
/// [`UploadSession`] implements it in-process; the `http` feature adds a
/// remote implementation.
#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn initiate(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> UploadResult<InitiateResult>;

    async fn get_part_targets(
        &self,
        transaction_id: &TransactionId,
        key: &ObjectKey,
        part_numbers: &[u32],
    ) -> UploadResult<Vec<PresignedPartTarget>>;

    async fn finalize(&self, request: &FinalizeRequest) -> UploadResult<FinalizeOutcome>;

    async fn abort(&self, transaction_id: &TransactionId, key: &ObjectKey) -> UploadResult<()>;
}

#[async_trait]
impl UploadApi for UploadSession {
    async fn initiate(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> UploadResult<InitiateResult> {
        self.initiate_for_file(file_name, file_size, content_type)
            .await
    }

    async fn get_part_targets(
        &self,
        transaction_id: &TransactionId,
        key: &ObjectKey,
        part_numbers: &[u32],
    ) -> UploadResult<Vec<PresignedPartTarget>> {
        UploadSession::get_part_targets(self, transaction_id, key, part_numbers).await
    }

    async fn finalize(&self, request: &FinalizeRequest) -> UploadResult<FinalizeOutcome> {
        UploadSession::finalize(self, &request.transaction_id, &request.object_key, &request.parts)
            .await
    }

    async fn abort(&self, transaction_id: &TransactionId, key: &ObjectKey) -> UploadResult<()> {
        UploadSession::abort(self, transaction_id, key).await
    }
}

/// Drives one file end-to-end: plan, initiate, upload parts, finalize.
pub struct UploadCoordinator {
    api: Arc<dyn UploadApi>,
    uploader: PartUploader,
    planner: PartPlanner,
    config: TransferConfig,
}

impl UploadCoordinator {
    pub fn new(
        api: Arc<dyn UploadApi>,
        transport: Arc<dyn PartTransport>,
        config: TransferConfig,
    ) -> Self {
        let policy = RetryPolicy {
            max_attempts: config.max_attempts,
            backoff: config.retry_backoff,
        };
        Self {
            api,
            uploader: PartUploader::new(transport, policy),
            planner: PartPlanner::new(config.chunk_size),
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Upload `file` under `file_name`.
    ///
    /// Either the object is committed and a receipt returned, or the first
    /// fatal error is returned and nothing is committed.
    pub async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        file: Bytes,
    ) -> UploadResult<TransferReceipt> {
        let total_size = file.len() as u64;
        let plan = self.planner.plan(total_size);

        info!(file_name, size = total_size, mode = ?plan.mode, "Starting upload");

        // An empty type would be signed as the server default
        if content_type.trim().is_empty() {
            return Err(UploadError::invalid("Content type must not be empty"));
        }

        let initiated = self
            .api
            .initiate(file_name, total_size, Some(content_type))
            .await?;

        if initiated.mode() != plan.mode {
            let err = UploadError::invalid(format!(
                "Server chose {:?} but the local plan is {:?}; chunk sizes differ",
                initiated.mode(),
                plan.mode
            ));
            if let InitiateResult::Multipart {
                object_key,
                transaction_id,
            } = &initiated
            {
                self.abort_after_failure(transaction_id, object_key, &err)
                    .await;
            }
            return Err(err);
        }

        match initiated {
            InitiateResult::SinglePart { object_key, target } => {
                let transfer = UploadTransfer {
                    object_key,
                    total_size,
                    chunk_size: plan.chunk_size,
                    mode: TransferMode::SinglePart,
                    transaction_id: None,
                };
                self.upload_single(transfer, target, content_type, file).await
            }
            InitiateResult::Multipart {
                object_key,
                transaction_id,
            } => {
                let transfer = UploadTransfer {
                    object_key,
                    total_size,
                    chunk_size: plan.chunk_size,
                    mode: TransferMode::Multipart,
                    transaction_id: Some(transaction_id.clone()),
                };
                let request = match self
                    .upload_parts(&transfer, &transaction_id, &plan, file)
                    .await
                {
                    Ok(request) => request,
                    Err(e) => {
                        self.abort_after_failure(&transaction_id, &transfer.object_key, &e)
                            .await;
                        return Err(e);
                    }
                };

                info!(key = %transfer.object_key, "All parts uploaded, finalizing");
                let outcome = self.api.finalize(&request).await?;

                Ok(TransferReceipt::new(&transfer, outcome.parts, outcome.etag))
            }
        }
    }

    async fn upload_single(
        &self,
        transfer: UploadTransfer,
        target: PresignedPartTarget,
        content_type: &str,
        file: Bytes,
    ) -> UploadResult<TransferReceipt> {
        // One PUT; finalize is implicit
        let result = self.uploader.upload_once(&target, content_type, file).await?;

        info!(key = %transfer.object_key, "Single-part upload complete");
        Ok(TransferReceipt::new(
            &transfer,
            1,
            Some(result.integrity_tag.to_string()),
        ))
    }

    /// Presign and PUT every part, returning the finalize claim.
    async fn upload_parts(
        &self,
        transfer: &UploadTransfer,
        transaction_id: &TransactionId,
        plan: &PartPlan,
        file: Bytes,
    ) -> UploadResult<FinalizeRequest> {
        let key = &transfer.object_key;
        let targets = self
            .api
            .get_part_targets(transaction_id, key, &plan.part_numbers())
            .await?;

        let mut by_number: HashMap<u32, PresignedPartTarget> = targets
            .into_iter()
            .map(|t| (t.part_number, t))
            .collect();

        let mut jobs = Vec::with_capacity(plan.parts.len());
        for part in &plan.parts {
            let target = by_number.remove(&part.part_number).ok_or_else(|| {
                UploadError::presign_failed(format!(
                    "No presigned URL returned for part {}",
                    part.part_number
                ))
            })?;
            jobs.push((target, part.slice(&file)));
        }

        info!(key = %key, parts = jobs.len(), concurrency = self.config.part_concurrency, "Uploading parts");

        // Dropping the stream on the first error cancels parts still in flight
        let results: Vec<PartResult> = futures::stream::iter(jobs)
            .map(|(target, bytes)| async move {
                self.uploader.upload(&target, PART_CONTENT_TYPE, bytes).await
            })
            .buffer_unordered(self.config.part_concurrency.max(1))
            .try_collect()
            .await?;

        FinalizeRequest::complete(
            transaction_id.clone(),
            key.clone(),
            results,
            plan.part_count(),
        )
    }

    /// Abort a transaction that can no longer reach finalize.
    ///
    /// The caller keeps returning `cause`; an abort failure is only logged.
    async fn abort_after_failure(
        &self,
        transaction_id: &TransactionId,
        key: &ObjectKey,
        cause: &UploadError,
    ) {
        error!(key = %key, error = %cause, "Upload failed");
        if self.config.abort_on_failure {
            self.abort_quietly(transaction_id, key).await;
        }
    }

    async fn abort_quietly(&self, transaction_id: &TransactionId, key: &ObjectKey) {
        if let Err(e) = self.api.abort(transaction_id, key).await {
            warn!(key = %key, upload_id = %transaction_id, error = %e, "Best-effort abort failed");
        }
    }
}
