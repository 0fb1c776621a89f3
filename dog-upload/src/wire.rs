//! JSON shapes of the upload contract, shared by server and client.
//!
//! Every request is a `POST` whose body carries an `action` discriminator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    FinalizeOutcome, FinalizeRequest, InitiateResult, IntegrityTag, ObjectKey, PartResult,
    PresignedPartTarget, TransactionId, UploadError, UploadResult,
};

/// Action names understood by the endpoint
pub const ACTIONS: [&str; 4] = ["initiate", "getUrls", "finalize", "abort"];

/// One request to the upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum UploadAction {
    #[serde(rename = "initiate", rename_all = "camelCase")]
    Initiate {
        file_name: String,
        file_size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },

    #[serde(rename = "getUrls", rename_all = "camelCase")]
    GetUrls {
        upload_id: TransactionId,
        key: ObjectKey,
        part_numbers: Vec<u32>,
    },

    #[serde(rename = "finalize", rename_all = "camelCase")]
    Finalize {
        upload_id: TransactionId,
        key: ObjectKey,
        parts: Vec<WirePart>,
    },

    #[serde(rename = "abort", rename_all = "camelCase")]
    Abort {
        upload_id: TransactionId,
        key: ObjectKey,
    },
}

impl UploadAction {
    /// Decode a raw request body.
    ///
    /// Malformed JSON and unknown actions are distinguished so the caller
    /// can report them separately.
    pub fn parse(body: &[u8]) -> UploadResult<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|_| UploadError::invalid("Invalid JSON in request body"))?;

        let known = value
            .get("action")
            .and_then(Value::as_str)
            .is_some_and(|a| ACTIONS.contains(&a));
        if !known {
            return Err(UploadError::invalid("Invalid action"));
        }

        serde_json::from_value(value).map_err(|e| UploadError::invalid(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Initiate { .. } => "initiate",
            Self::GetUrls { .. } => "getUrls",
            Self::Finalize { .. } => "finalize",
            Self::Abort { .. } => "abort",
        }
    }
}

impl From<&FinalizeRequest> for UploadAction {
    fn from(request: &FinalizeRequest) -> Self {
        Self::Finalize {
            upload_id: request.transaction_id.clone(),
            key: request.object_key.clone(),
            parts: request.parts.iter().map(WirePart::from).collect(),
        }
    }
}

/// A part as it travels in a finalize request, S3 casing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

impl From<&PartResult> for WirePart {
    fn from(part: &PartResult) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.integrity_tag.as_str().to_string(),
        }
    }
}

impl From<WirePart> for PartResult {
    fn from(part: WirePart) -> Self {
        PartResult::new(part.part_number, IntegrityTag::from_raw(part.etag))
    }
}

/// Answer to `initiate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitiateResponse {
    #[serde(rename_all = "camelCase")]
    Multipart { upload_id: TransactionId, key: ObjectKey },

    #[serde(rename_all = "camelCase")]
    SinglePart {
        key: ObjectKey,
        presigned_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<i64>,
    },
}

impl From<InitiateResult> for InitiateResponse {
    fn from(result: InitiateResult) -> Self {
        match result {
            InitiateResult::SinglePart { object_key, target } => Self::SinglePart {
                key: object_key,
                presigned_url: target.url,
                expires_at: Some(target.expires_at),
            },
            InitiateResult::Multipart {
                object_key,
                transaction_id,
            } => Self::Multipart {
                upload_id: transaction_id,
                key: object_key,
            },
        }
    }
}

impl From<InitiateResponse> for InitiateResult {
    fn from(response: InitiateResponse) -> Self {
        match response {
            InitiateResponse::SinglePart {
                key,
                presigned_url,
                expires_at,
            } => Self::SinglePart {
                object_key: key,
                target: PresignedPartTarget::new(1, presigned_url, expires_at.unwrap_or(0)),
            },
            InitiateResponse::Multipart { upload_id, key } => Self::Multipart {
                object_key: key,
                transaction_id: upload_id,
            },
        }
    }
}

/// Answer to `getUrls`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUrlsResponse {
    pub signed_urls: Vec<SignedUrl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub part_number: u32,
    pub signed_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl From<Vec<PresignedPartTarget>> for GetUrlsResponse {
    fn from(targets: Vec<PresignedPartTarget>) -> Self {
        Self {
            signed_urls: targets
                .into_iter()
                .map(|t| SignedUrl {
                    part_number: t.part_number,
                    signed_url: t.url,
                    expires_at: Some(t.expires_at),
                })
                .collect(),
        }
    }
}

impl GetUrlsResponse {
    pub fn into_targets(self) -> Vec<PresignedPartTarget> {
        self.signed_urls
            .into_iter()
            .map(|s| PresignedPartTarget::new(s.part_number, s.signed_url, s.expires_at.unwrap_or(0)))
            .collect()
    }
}

/// Answer to `finalize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub success: bool,
    pub data: FinalizeOutcome,
}

/// Answer to `abort`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortResponse {
    pub success: bool,
}

/// Feathers-style error body: `{name, message, code, className, data?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub name: String,
    pub message: String,
    pub code: u16,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorPayload {
    fn bad_request(message: String, data: Value) -> Self {
        Self {
            name: "BadRequest".to_string(),
            message,
            code: 400,
            class_name: "bad-request".to_string(),
            data: Some(data),
        }
    }

    fn general_error(message: String, data: Value) -> Self {
        Self {
            name: "GeneralError".to_string(),
            message,
            code: 500,
            class_name: "general-error".to_string(),
            data: Some(data),
        }
    }

    /// Client-safe rendering of an error. Sources are never included.
    pub fn from_error(error: &UploadError) -> Self {
        let message = error.to_string();
        match error {
            UploadError::Invalid { message } => {
                Self::bad_request(message.clone(), json!({ "reason": "Invalid" }))
            }
            UploadError::MissingOrMismatchedParts { parts } => {
                let parts: Vec<WirePart> = parts.iter().map(WirePart::from).collect();
                Self::bad_request(
                    "Some parts are missing or have incorrect ETags".to_string(),
                    json!({ "reason": "MissingOrMismatchedParts", "parts": parts }),
                )
            }
            UploadError::BackendUnavailable { message, .. } => {
                Self::general_error(message.clone(), json!({ "reason": "BackendUnavailable" }))
            }
            UploadError::PresignIssuanceFailed { message, .. } => {
                Self::general_error(message.clone(), json!({ "reason": "PresignIssuanceFailed" }))
            }
            _ => Self::general_error(message, json!({ "reason": "GeneralError" })),
        }
    }

    fn reason(&self) -> Option<&str> {
        self.data.as_ref()?.get("reason")?.as_str()
    }

    /// Rebuild the library error a server reported.
    pub fn into_error(self) -> UploadError {
        match self.reason() {
            Some("Invalid") => UploadError::invalid(self.message),
            Some("MissingOrMismatchedParts") => {
                let parts = self
                    .data
                    .as_ref()
                    .and_then(|d| d.get("parts").cloned())
                    .and_then(|p| serde_json::from_value::<Vec<WirePart>>(p).ok())
                    .unwrap_or_default();
                UploadError::MissingOrMismatchedParts {
                    parts: parts.into_iter().map(PartResult::from).collect(),
                }
            }
            Some("BackendUnavailable") => UploadError::backend_message(self.message),
            Some("PresignIssuanceFailed") => UploadError::presign_failed(self.message),
            _ => UploadError::Api {
                status: self.code,
                name: self.name,
                message: self.message,
            },
        }
    }
}
