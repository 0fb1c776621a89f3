use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use dog_upload::{
    HttpUploadApi, ProcessingNotifier, ReqwestTransport, TransferMode, UploadCoordinator,
};
use tracing::{error, info};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let storage = cli.storage();
    if cli.notify_url.is_some() && storage.is_none() {
        bail!("--notify-url needs --bucket to build the document URL");
    }

    let content_type = cli.content_type();
    let size = tokio::fs::metadata(&cli.file)
        .await
        .with_context(|| format!("cannot read {}", cli.file.display()))?
        .len();

    // Same rules the server applies, checked before any network call
    cli.file_rules()
        .validate_file(size, Some(&content_type))
        .context("file rejected")?;

    let file = Bytes::from(
        tokio::fs::read(&cli.file)
            .await
            .with_context(|| format!("cannot read {}", cli.file.display()))?,
    );

    let coordinator = UploadCoordinator::new(
        Arc::new(HttpUploadApi::new(cli.endpoint.clone())),
        Arc::new(ReqwestTransport::new()),
        cli.transfer_config(),
    );

    let receipt = coordinator
        .upload(&cli.file_name(), &content_type, file)
        .await
        .context("upload failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        let mode = match receipt.mode {
            TransferMode::SinglePart => "single PUT".to_string(),
            TransferMode::Multipart => format!("{} parts", receipt.parts),
        };
        println!("uploaded {} ({} bytes, {})", receipt.key, receipt.size_bytes, mode);
    }

    if let (Some(url), Some(email), Some(storage)) = (&cli.notify_url, &cli.email, &storage) {
        let document_url = storage.object_url(&receipt.key);
        ProcessingNotifier::new(url.clone())
            .notify(&document_url, email)
            .await
            .inspect_err(|e| error!(error = %e, "Upload committed but processing request failed"))
            .context("processing request failed")?;
        info!(document_url, "Document sent for processing");
    }

    Ok(())
}
