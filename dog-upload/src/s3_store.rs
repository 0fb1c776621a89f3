use std::env;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use tracing::debug;

use crate::store::{CommitResult, CompletedPart};
use crate::{MultipartStore, ObjectKey, RecordedPart, TransactionId, UploadError, UploadResult};

/// Connection settings for an S3 or S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl S3Config {
    pub fn new<B: Into<String>, R: Into<String>>(bucket: B, region: R) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }

    /// Read settings from `S3_BUCKET`, `AWS_REGION`, `S3_ENDPOINT_URL`,
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `S3_FORCE_PATH_STYLE`.
    ///
    /// Only the bucket is required. Without static keys the AWS default
    /// credential chain is used.
    pub fn from_env() -> UploadResult<Self> {
        let bucket = env::var("S3_BUCKET")
            .map_err(|_| UploadError::invalid("S3_BUCKET environment variable required"))?;
        let optional = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());

        Ok(Self {
            bucket,
            region: optional("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            endpoint_url: optional("S3_ENDPOINT_URL"),
            access_key_id: optional("AWS_ACCESS_KEY_ID"),
            secret_access_key: optional("AWS_SECRET_ACCESS_KEY"),
            force_path_style: optional("S3_FORCE_PATH_STYLE")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint_url: S) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_credentials<A: Into<String>, S: Into<String>>(
        mut self,
        access_key_id: A,
        secret_access_key: S,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_path_style(mut self, force_path_style: bool) -> Self {
        self.force_path_style = force_path_style;
        self
    }

    /// Public address of `key` in this bucket
    pub fn object_url(&self, key: &ObjectKey) -> String {
        match &self.endpoint_url {
            Some(endpoint) if self.force_path_style => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
            }
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                match endpoint.split_once("://") {
                    Some((scheme, host)) => format!("{}://{}.{}/{}", scheme, self.bucket, host, key),
                    None => format!("{}.{}/{}", self.bucket, endpoint, key),
                }
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

/// Multipart store backed by the AWS SDK.
///
/// The client is built once and owned by the store; sessions receive the
/// store explicitly.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    config: S3Config,
}

impl S3Store {
    pub async fn new(config: S3Config) -> Self {
        let client = Self::create_client(&config).await;
        Self { client, config }
    }

    pub async fn from_env() -> UploadResult<Self> {
        Ok(Self::new(S3Config::from_env()?).await)
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client, config: S3Config) -> Self {
        Self { client, config }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn create_client(config: &S3Config) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            let credentials = Credentials::new(id, secret, None, None, "dog-upload");
            loader = loader.credentials_provider(credentials);
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let aws_config = loader.load().await;
        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        )
    }

    fn presigning(expires_in: Duration) -> UploadResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in).map_err(UploadError::backend)
    }
}

#[async_trait]
impl MultipartStore for S3Store {
    async fn presign_put(
        &self,
        key: &ObjectKey,
        content_type: &str,
        expires_in: Duration,
    ) -> UploadResult<String> {
        let request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(UploadError::backend)?;

        Ok(request.uri().to_string())
    }

    async fn create_multipart(
        &self,
        key: &ObjectKey,
        content_type: &str,
    ) -> UploadResult<TransactionId> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .send()
            .await
            .map_err(UploadError::backend)?;

        output
            .upload_id()
            .map(TransactionId::new)
            .ok_or_else(|| UploadError::backend_message("CreateMultipartUpload returned no UploadId"))
    }

    async fn presign_part(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
        part_number: u32,
        expires_in: Duration,
    ) -> UploadResult<String> {
        let request = self
            .client
            .upload_part()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .upload_id(transaction_id.as_str())
            .part_number(part_number as i32)
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(UploadError::backend)?;

        Ok(request.uri().to_string())
    }

    async fn list_parts(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
    ) -> UploadResult<Vec<RecordedPart>> {
        let mut recorded = Vec::new();
        let mut marker: Option<String> = None;

        // ListParts pages at 1000 parts
        loop {
            let output = self
                .client
                .list_parts()
                .bucket(&self.config.bucket)
                .key(key.as_str())
                .upload_id(transaction_id.as_str())
                .set_part_number_marker(marker.take())
                .send()
                .await
                .map_err(UploadError::backend)?;

            recorded.extend(output.parts().iter().filter_map(|part| {
                Some(RecordedPart {
                    part_number: u32::try_from(part.part_number()?).ok()?,
                    etag: part.e_tag()?.to_string(),
                    size_bytes: part.size().unwrap_or(0).max(0) as u64,
                })
            }));

            match (output.is_truncated(), output.next_part_number_marker()) {
                (Some(true), Some(next)) => marker = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(key = %key, count = recorded.len(), "Listed recorded parts");
        Ok(recorded)
    }

    async fn complete_multipart(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
        parts: Vec<CompletedPart>,
    ) -> UploadResult<CommitResult> {
        let completed = parts
            .into_iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(p.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .upload_id(transaction_id.as_str())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(UploadError::backend)?;

        Ok(CommitResult {
            etag: output.e_tag().map(str::to_string),
            location: output.location().map(str::to_string),
        })
    }

    async fn abort_multipart(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
    ) -> UploadResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .upload_id(transaction_id.as_str())
            .send()
            .await
            .map_err(UploadError::backend)?;
        Ok(())
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        self.config.object_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aws_object_url_is_virtual_hosted() {
        let config = S3Config::new("docs", "eu-west-1");
        assert_eq!(
            config.object_url(&ObjectKey::new("uploads/a.pdf")),
            "https://docs.s3.eu-west-1.amazonaws.com/uploads/a.pdf"
        );
    }

    #[test]
    fn custom_endpoint_respects_path_style() {
        let config = S3Config::new("docs", "us-east-1")
            .with_endpoint("http://localhost:9000/")
            .with_path_style(true);
        assert_eq!(
            config.object_url(&ObjectKey::new("k")),
            "http://localhost:9000/docs/k"
        );

        let config = config.with_path_style(false);
        assert_eq!(
            config.object_url(&ObjectKey::new("k")),
            "http://docs.localhost:9000/k"
        );
    }

    #[tokio::test]
    async fn presigned_part_url_carries_upload_id_and_part_number() {
        let config = S3Config::new("docs", "eu-west-1").with_credentials("AKIDEXAMPLE", "secret");
        let store = S3Store::new(config).await;

        let url = store
            .presign_part(
                &ObjectKey::new("uploads/a.pdf"),
                &TransactionId::new("abc123"),
                7,
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        assert!(url.contains("docs.s3.eu-west-1.amazonaws.com/uploads/a.pdf?"));
        assert!(url.contains("partNumber=7"));
        assert!(url.contains("uploadId=abc123"));
        assert!(url.contains("X-Amz-Expires=3600"));
    }
}
