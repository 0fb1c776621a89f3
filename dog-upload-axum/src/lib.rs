//! dog-upload-axum: HTTP surface for dog-upload.
//!
//! Serves the upload contract on `POST /api/upload-zip`, one body per
//! action (`initiate`, `getUrls`, `finalize`, `abort`), with errors in the
//! Feathers `{name, message, code, className}` shape.

pub mod app;
pub mod config;
pub mod routes;
pub mod state;
mod error;
pub use error::UploadAxumError;
pub use state::UploadState;

pub use app::UploadApp;
pub use config::AppConfig;
pub use routes::UPLOAD_PATH;
