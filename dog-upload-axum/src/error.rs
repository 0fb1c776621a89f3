use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dog_upload::wire::ErrorPayload;
use dog_upload::UploadError;
use tracing::{error, warn};

#[derive(Debug)]
pub struct UploadAxumError(pub UploadError);

impl From<UploadError> for UploadAxumError {
    fn from(e: UploadError) -> Self {
        Self(e)
    }
}

impl IntoResponse for UploadAxumError {
    fn into_response(self) -> Response {
        // Only the message travels; the source chain stays in the logs
        let payload = ErrorPayload::from_error(&self.0);
        let status =
            StatusCode::from_u16(payload.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(error = ?self.0, "Upload request failed");
        } else {
            warn!(error = %self.0, "Upload request rejected");
        }

        (status, Json(payload)).into_response()
    }
}
