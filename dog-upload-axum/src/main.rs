use std::sync::Arc;

use anyhow::Result;
use dog_upload::{S3Store, UploadSession};
use dog_upload_axum::{AppConfig, UploadApp};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env();
    let store = S3Store::from_env().await?;
    info!(bucket = store.bucket(), "Using S3 bucket");

    let session = UploadSession::new(Arc::new(store), config.upload_config()?);
    let app = UploadApp::new(session);

    app.listen(config.address()?).await?;

    Ok(())
}
