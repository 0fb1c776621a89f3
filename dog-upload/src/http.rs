//! reqwest bindings: the upload contract over HTTP, part PUTs, and the
//! post-upload processing hook.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::wire::{
    AbortResponse, ErrorPayload, FinalizeResponse, GetUrlsResponse, InitiateResponse, UploadAction,
};
use crate::{
    FinalizeOutcome, FinalizeRequest, InitiateResult, ObjectKey, PartTransport,
    PresignedPartTarget, TransactionId, TransportError, UploadApi, UploadError, UploadResult,
};

fn transport_error(e: reqwest::Error) -> UploadError {
    UploadError::Transport {
        message: e.to_string(),
    }
}

/// Talks to an upload endpoint such as `https://host/api/upload-zip`.
#[derive(Clone)]
pub struct HttpUploadApi {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUploadApi {
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client<S: Into<String>>(client: reqwest::Client, endpoint: S) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<T: DeserializeOwned>(&self, action: &UploadAction) -> UploadResult<T> {
        debug!(action = action.name(), endpoint = %self.endpoint, "Calling upload endpoint");

        let response = self
            .client
            .post(&self.endpoint)
            .json(action)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(match serde_json::from_slice::<ErrorPayload>(&body) {
                Ok(payload) => payload.into_error(),
                Err(_) => UploadError::Api {
                    status: status.as_u16(),
                    name: status.canonical_reason().unwrap_or("Error").to_string(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                },
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn initiate(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> UploadResult<InitiateResult> {
        let action = UploadAction::Initiate {
            file_name: file_name.to_string(),
            file_size,
            content_type: content_type.map(str::to_string),
        };
        let response: InitiateResponse = self.post(&action).await?;
        Ok(response.into())
    }

    async fn get_part_targets(
        &self,
        transaction_id: &TransactionId,
        key: &ObjectKey,
        part_numbers: &[u32],
    ) -> UploadResult<Vec<PresignedPartTarget>> {
        let action = UploadAction::GetUrls {
            upload_id: transaction_id.clone(),
            key: key.clone(),
            part_numbers: part_numbers.to_vec(),
        };
        let response: GetUrlsResponse = self.post(&action).await?;
        Ok(response.into_targets())
    }

    async fn finalize(&self, request: &FinalizeRequest) -> UploadResult<FinalizeOutcome> {
        let response: FinalizeResponse = self.post(&UploadAction::from(request)).await?;
        if !response.success {
            return Err(UploadError::Api {
                status: 200,
                name: "FinalizeRejected".to_string(),
                message: "Server reported an unsuccessful finalize".to_string(),
            });
        }
        Ok(response.data)
    }

    async fn abort(&self, transaction_id: &TransactionId, key: &ObjectKey) -> UploadResult<()> {
        let action = UploadAction::Abort {
            upload_id: transaction_id.clone(),
            key: key.clone(),
        };
        let _: AbortResponse = self.post(&action).await?;
        Ok(())
    }
}

/// PUTs part bytes straight to presigned storage URLs.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose every PUT gives up after `timeout`
    pub fn with_timeout(timeout: Duration) -> UploadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PartTransport for ReqwestTransport {
    async fn put(&self, url: &str, content_type: &str, body: Bytes) -> Result<(), TransportError> {
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connection(e.to_string())
                } else {
                    TransportError::Other(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Serialize)]
struct ProcessingRequest<'a> {
    pdf_url: &'a str,
    email: &'a str,
}

/// Hands a committed document to the downstream processing service.
///
/// Runs after the transfer; a failure here leaves the object in place.
#[derive(Clone)]
pub struct ProcessingNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl ProcessingNotifier {
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub async fn notify(&self, document_url: &str, email: &str) -> UploadResult<()> {
        self.client
            .post(&self.endpoint)
            .json(&ProcessingRequest {
                pdf_url: document_url,
                email,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport_error)?;

        info!(document_url, "Processing requested");
        Ok(())
    }
}
