//! # dog-upload: direct-to-storage multipart uploads
//!
//! `dog-upload` moves large files from a client straight into S3-compatible
//! object storage. The server never touches file bytes: it only issues
//! time-limited presigned URLs and verifies the result before committing.
//!
//! ## Protocol
//!
//! ```text
//! client                      server (UploadSession)          storage
//!   │ initiate(name, size) ──▶ presign PUT | CreateMultipart ─▶
//!   │ getUrls(parts)       ──▶ presign UploadPart × n        ─▶
//!   │ PUT part bytes ─────────────────────────────────────────▶
//!   │ finalize(parts)      ──▶ ListParts, compare, Complete  ─▶
//! ```
//!
//! Files below the chunk size (5 MiB by default) skip the multipart
//! protocol and go up in a single presigned PUT.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use dog_upload::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let store = MemoryStore::new("documents");
//! let session = UploadSession::new(Arc::new(store.clone()), UploadConfig::default());
//!
//! let coordinator = UploadCoordinator::new(
//!     Arc::new(session),
//!     Arc::new(MemoryTransport::new(store.clone())),
//!     TransferConfig::default(),
//! );
//!
//! let file = Bytes::from(vec![7u8; 12 * 1024 * 1024]);
//! let receipt = coordinator.upload("report.pdf", "application/pdf", file).await?;
//! assert_eq!(receipt.parts, 3);
//! # Ok(())
//! # }
//! ```
//!
//! Against a real deployment the session sits behind the HTTP endpoint of
//! `dog-upload-axum`, and the client uses [`HttpUploadApi`] and
//! [`ReqwestTransport`] (feature `http`).

mod config;
mod coordinator;
mod error;
mod memory_store;
mod planner;
mod s3_store;
mod session;
pub mod store;
mod types;
mod uploader;
mod verifier;
pub mod wire;

#[cfg(feature = "http")]
mod http;

pub use config::{
    TransferConfig, UploadConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_BYTES,
    DEFAULT_PRESIGN_EXPIRY, MAX_PART_NUMBER,
};
pub use coordinator::{UploadApi, UploadCoordinator};
pub use error::{BoxError, TransportError, UploadError, UploadResult};
pub use memory_store::{MemoryStore, MemoryTransport, StoredObject};
pub use planner::{plan, PartPlan, PartPlanner};
pub use s3_store::{S3Config, S3Store};
pub use session::UploadSession;
pub use store::{DefaultKeyStrategy, MultipartStore, ObjectKeyStrategy};
pub use types::{
    normalize_tag, ByteRange, FinalizeOutcome, FinalizeRequest, InitiateResult, IntegrityTag,
    ObjectKey, PartDescriptor, PartResult, PresignedPartTarget, RecordedPart, TransactionId,
    TransferMode, TransferReceipt, UploadTransfer,
};
pub use uploader::{PartTransport, PartUploader, RetryPolicy, PART_CONTENT_TYPE};
pub use verifier::{missing_parts, FinalizeVerifier};

#[cfg(feature = "http")]
pub use http::{HttpUploadApi, ProcessingNotifier, ReqwestTransport};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        MemoryStore, MemoryTransport, MultipartStore, ObjectKey, PartTransport, S3Config,
        S3Store, TransactionId, TransferConfig, TransferReceipt, UploadApi, UploadConfig,
        UploadCoordinator, UploadError, UploadResult, UploadSession,
    };

    #[cfg(feature = "http")]
    pub use crate::{HttpUploadApi, ReqwestTransport};
}
