use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use bytes::Bytes;
use dog_upload::wire::{
    AbortResponse, FinalizeResponse, GetUrlsResponse, InitiateResponse, UploadAction,
};
use dog_upload::PartResult;
use serde_json::json;
use tracing::debug;

use crate::{UploadAxumError, UploadState};

/// Path of the action endpoint
pub const UPLOAD_PATH: &str = "/api/upload-zip";

pub fn upload_router(state: UploadState) -> Router<()> {
    Router::new()
        .route(UPLOAD_PATH, routing::post(handle_action))
        .route("/health", routing::get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// Raw bytes rather than `Json<_>` so malformed bodies and unknown actions
// get their own messages
async fn handle_action(
    State(state): State<UploadState>,
    body: Bytes,
) -> Result<Response, UploadAxumError> {
    let action = UploadAction::parse(&body)?;
    debug!(action = action.name(), "Upload action received");

    let session = &state.session;
    let response = match action {
        UploadAction::Initiate {
            file_name,
            file_size,
            content_type,
        } => {
            let result = session
                .initiate_for_file(&file_name, file_size, content_type.as_deref())
                .await?;
            Json(InitiateResponse::from(result)).into_response()
        }
        UploadAction::GetUrls {
            upload_id,
            key,
            part_numbers,
        } => {
            let targets = session
                .get_part_targets(&upload_id, &key, &part_numbers)
                .await?;
            Json(GetUrlsResponse::from(targets)).into_response()
        }
        UploadAction::Finalize {
            upload_id,
            key,
            parts,
        } => {
            let parts: Vec<PartResult> = parts.into_iter().map(PartResult::from).collect();
            let data = session.finalize(&upload_id, &key, &parts).await?;
            Json(FinalizeResponse {
                success: true,
                data,
            })
            .into_response()
        }
        UploadAction::Abort { upload_id, key } => {
            session.abort(&upload_id, &key).await?;
            Json(AbortResponse { success: true }).into_response()
        }
    };

    Ok(response)
}
