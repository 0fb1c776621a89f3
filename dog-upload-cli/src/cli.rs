use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use dog_upload::{
    S3Config, TransferConfig, UploadConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_BYTES,
};

/// Upload a document to a dog-upload server
#[derive(Debug, Parser)]
#[command(name = "dog-upload", version, about)]
pub struct Cli {
    /// File to upload
    pub file: PathBuf,

    /// Upload endpoint
    #[arg(
        long,
        env = "DOG_UPLOAD_ENDPOINT",
        default_value = "http://127.0.0.1:3030/api/upload-zip"
    )]
    pub endpoint: String,

    /// MIME type; guessed from the file extension when omitted
    #[arg(long)]
    pub content_type: Option<String>,

    /// Part size in bytes, must match the server
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Largest file accepted
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_BYTES)]
    pub max_file_bytes: u64,

    /// Parts uploaded at once
    #[arg(long, default_value_t = 6)]
    pub concurrency: usize,

    /// Attempts per part
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,

    /// Wait between attempts, in milliseconds
    #[arg(long)]
    pub retry_backoff_ms: Option<u64>,

    /// Leave a failed multipart upload open instead of aborting it
    #[arg(long)]
    pub no_abort: bool,

    /// Accept any content type
    #[arg(long)]
    pub any_type: bool,

    /// Processing service to notify once the upload is committed
    #[arg(long, requires = "email")]
    pub notify_url: Option<String>,

    /// Email passed along with the notification
    #[arg(long)]
    pub email: Option<String>,

    /// Bucket the server writes to, for the document URL
    #[arg(long, requires = "notify_url")]
    pub bucket: Option<String>,

    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Print the receipt as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub fn content_type(&self) -> String {
        self.content_type
            .clone()
            .unwrap_or_else(|| guess_content_type(&self.file).to_string())
    }

    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    }

    /// Local copy of the server's file rules
    pub fn file_rules(&self) -> UploadConfig {
        let rules = UploadConfig::default().with_max_file_bytes(self.max_file_bytes);
        if self.any_type {
            rules.with_accepted_content_types(Vec::<String>::new())
        } else {
            rules
        }
    }

    pub fn transfer_config(&self) -> TransferConfig {
        let mut config = TransferConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_part_concurrency(self.concurrency)
            .with_max_attempts(self.attempts);
        if let Some(ms) = self.retry_backoff_ms {
            config = config.with_retry_backoff(Duration::from_millis(ms));
        }
        if self.no_abort {
            config = config.without_abort();
        }
        config
    }

    pub fn storage(&self) -> Option<S3Config> {
        self.bucket
            .as_ref()
            .map(|bucket| S3Config::new(bucket.clone(), self.region.clone()))
    }
}

pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
