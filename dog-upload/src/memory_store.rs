use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;

use crate::store::{CommitResult, CompletedPart};
use crate::{
    normalize_tag, IntegrityTag, MultipartStore, ObjectKey, PartTransport, RecordedPart,
    TransactionId, TransportError, UploadError, UploadResult,
};

/// In-process storage backend with real multipart bookkeeping.
///
/// Presigned URLs use the `memory://` scheme and are honoured by
/// [`MemoryTransport`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryState>,
}

struct MemoryState {
    bucket: String,
    objects: DashMap<String, StoredObject>,
    transactions: DashMap<String, Transaction>,
    grants: DashMap<String, Grant>,
    unavailable: AtomicBool,
    presign_failures: DashMap<u32, ()>,
    commits: AtomicUsize,
    aborts: AtomicUsize,
}

/// A committed object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub etag: String,
}

struct Transaction {
    key: String,
    content_type: String,
    parts: BTreeMap<u32, StoredPart>,
}

struct StoredPart {
    bytes: Bytes,
    etag: String,
}

#[derive(Clone)]
enum Grant {
    Object {
        key: String,
        content_type: String,
        expires_at: i64,
    },
    Part {
        upload_id: String,
        part_number: u32,
        expires_at: i64,
    },
}

impl Grant {
    fn expires_at(&self) -> i64 {
        match self {
            Grant::Object { expires_at, .. } | Grant::Part { expires_at, .. } => *expires_at,
        }
    }

    fn part_number(&self) -> u32 {
        match self {
            Grant::Object { .. } => 1,
            Grant::Part { part_number, .. } => *part_number,
        }
    }
}

impl MemoryStore {
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        Self {
            inner: Arc::new(MemoryState {
                bucket: bucket.into(),
                objects: DashMap::new(),
                transactions: DashMap::new(),
                grants: DashMap::new(),
                unavailable: AtomicBool::new(false),
                presign_failures: DashMap::new(),
                commits: AtomicUsize::new(0),
                aborts: AtomicUsize::new(0),
            }),
        }
    }

    /// Make every backend call fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make presigning of `part_number` fail
    pub fn fail_presign_for_part(&self, part_number: u32) {
        self.inner.presign_failures.insert(part_number, ());
    }

    /// Committed object under `key`, if any
    pub fn object(&self, key: &ObjectKey) -> Option<StoredObject> {
        self.inner.objects.get(key.as_str()).map(|o| o.clone())
    }

    /// Transactions opened but neither committed nor aborted
    pub fn open_transactions(&self) -> usize {
        self.inner.transactions.len()
    }

    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.inner.aborts.load(Ordering::SeqCst)
    }

    /// Forget a recorded part, as if it had never been durably written
    pub fn discard_part(&self, transaction_id: &TransactionId, part_number: u32) {
        if let Some(mut txn) = self.inner.transactions.get_mut(transaction_id.as_str()) {
            txn.parts.remove(&part_number);
        }
    }

    /// Presigned URLs not yet used, expired, committed or aborted
    pub fn outstanding_grants(&self) -> usize {
        self.inner.grants.len()
    }

    /// Part number a presigned URL was issued for
    pub fn part_number_for(&self, url: &str) -> Option<u32> {
        self.inner.grants.get(url).map(|g| g.part_number())
    }

    /// Storage side of a presigned PUT. Returns the stored ETag.
    pub fn receive(
        &self,
        url: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<String, TransportError> {
        let grant = self
            .inner
            .grants
            .get(url)
            .map(|g| g.clone())
            .ok_or_else(|| forbidden("unknown or forged URL"))?;

        if grant.expires_at() < now() {
            return Err(forbidden("request has expired"));
        }

        let etag = IntegrityTag::compute(&body).as_str().to_string();
        match grant {
            Grant::Object {
                key,
                content_type: signed_type,
                ..
            } => {
                if !signed_type.eq_ignore_ascii_case(content_type) {
                    return Err(forbidden("content type does not match signature"));
                }
                self.inner.objects.insert(
                    key,
                    StoredObject {
                        bytes: body,
                        content_type: signed_type,
                        etag: etag.clone(),
                    },
                );
                self.inner.grants.remove(url);
            }
            Grant::Part {
                upload_id,
                part_number,
                ..
            } => {
                let mut txn = self
                    .inner
                    .transactions
                    .get_mut(&upload_id)
                    .ok_or_else(|| TransportError::Status {
                        status: 404,
                        body: "NoSuchUpload".to_string(),
                    })?;
                txn.parts.insert(
                    part_number,
                    StoredPart {
                        bytes: body,
                        etag: etag.clone(),
                    },
                );
            }
        }

        Ok(etag)
    }

    fn revoke_part_grants(&self, transaction_id: &TransactionId) {
        self.inner.grants.retain(|_, g| {
            !matches!(g, Grant::Part { upload_id, .. } if upload_id == transaction_id.as_str())
        });
    }

    fn check_available(&self) -> UploadResult<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(UploadError::backend_message("memory store is unavailable"));
        }
        Ok(())
    }

    fn grant(&self, grant: Grant, key: &ObjectKey) -> String {
        let current = now();
        self.inner.grants.retain(|_, g| g.expires_at() >= current);

        let url = format!(
            "memory://{}/{}?token={}",
            self.inner.bucket,
            key,
            uuid::Uuid::new_v4().simple()
        );
        self.inner.grants.insert(url.clone(), grant);
        url
    }
}

fn forbidden(reason: &str) -> TransportError {
    TransportError::Status {
        status: 403,
        body: reason.to_string(),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn expiry(expires_in: Duration) -> i64 {
    now() + expires_in.as_secs() as i64
}

#[async_trait]
impl MultipartStore for MemoryStore {
    async fn presign_put(
        &self,
        key: &ObjectKey,
        content_type: &str,
        expires_in: Duration,
    ) -> UploadResult<String> {
        self.check_available()?;
        let grant = Grant::Object {
            key: key.as_str().to_string(),
            content_type: content_type.to_string(),
            expires_at: expiry(expires_in),
        };
        Ok(self.grant(grant, key))
    }

    async fn create_multipart(
        &self,
        key: &ObjectKey,
        content_type: &str,
    ) -> UploadResult<TransactionId> {
        self.check_available()?;
        let upload_id = format!("mpu_{}", uuid::Uuid::new_v4().simple());
        self.inner.transactions.insert(
            upload_id.clone(),
            Transaction {
                key: key.as_str().to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(TransactionId(upload_id))
    }

    async fn presign_part(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
        part_number: u32,
        expires_in: Duration,
    ) -> UploadResult<String> {
        self.check_available()?;
        if self.inner.presign_failures.contains_key(&part_number) {
            return Err(UploadError::backend_message(format!(
                "cannot sign part {}",
                part_number
            )));
        }
        if !self.inner.transactions.contains_key(transaction_id.as_str()) {
            return Err(UploadError::backend_message("NoSuchUpload"));
        }
        let grant = Grant::Part {
            upload_id: transaction_id.as_str().to_string(),
            part_number,
            expires_at: expiry(expires_in),
        };
        Ok(self.grant(grant, key))
    }

    async fn list_parts(
        &self,
        _key: &ObjectKey,
        transaction_id: &TransactionId,
    ) -> UploadResult<Vec<RecordedPart>> {
        self.check_available()?;
        let txn = self
            .inner
            .transactions
            .get(transaction_id.as_str())
            .ok_or_else(|| UploadError::backend_message("NoSuchUpload"))?;

        Ok(txn
            .parts
            .iter()
            .map(|(n, p)| RecordedPart {
                part_number: *n,
                etag: p.etag.clone(),
                size_bytes: p.bytes.len() as u64,
            })
            .collect())
    }

    async fn complete_multipart(
        &self,
        key: &ObjectKey,
        transaction_id: &TransactionId,
        parts: Vec<CompletedPart>,
    ) -> UploadResult<CommitResult> {
        self.check_available()?;
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(UploadError::backend_message("InvalidPartOrder"));
        }

        let mut assembled = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len());
        {
            let txn = self
                .inner
                .transactions
                .get(transaction_id.as_str())
                .ok_or_else(|| UploadError::backend_message("NoSuchUpload"))?;

            // An invalid part leaves the transaction open, as S3 does
            for part in &parts {
                let stored = txn
                    .parts
                    .get(&part.part_number)
                    .filter(|p| normalize_tag(&p.etag) == normalize_tag(&part.etag))
                    .ok_or_else(|| {
                        UploadError::backend_message(format!("InvalidPart {}", part.part_number))
                    })?;
                assembled.extend_from_slice(&stored.bytes);
                digests.push(normalize_tag(&stored.etag));
            }
        }

        let (_, txn) = self
            .inner
            .transactions
            .remove(transaction_id.as_str())
            .ok_or_else(|| UploadError::backend_message("NoSuchUpload"))?;

        // S3 style: hash of the part hashes, suffixed with the part count
        let etag = format!(
            "\"{:x}-{}\"",
            md5::compute(digests.concat().as_bytes()),
            parts.len()
        );
        self.inner.objects.insert(
            txn.key.clone(),
            StoredObject {
                bytes: assembled.freeze(),
                content_type: txn.content_type.clone(),
                etag: etag.clone(),
            },
        );
        self.revoke_part_grants(transaction_id);
        self.inner.commits.fetch_add(1, Ordering::SeqCst);

        Ok(CommitResult {
            etag: Some(etag),
            location: Some(self.object_url(key)),
        })
    }

    async fn abort_multipart(
        &self,
        _key: &ObjectKey,
        transaction_id: &TransactionId,
    ) -> UploadResult<()> {
        self.check_available()?;
        self.inner
            .transactions
            .remove(transaction_id.as_str())
            .ok_or_else(|| UploadError::backend_message("NoSuchUpload"))?;
        self.revoke_part_grants(transaction_id);
        self.inner.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        format!("memory://{}/{}", self.inner.bucket, key)
    }
}

/// Client transport that delivers presigned PUTs to a [`MemoryStore`].
///
/// Failures can be scripted per part number to exercise retry paths.
#[derive(Clone)]
pub struct MemoryTransport {
    store: MemoryStore,
    failures: Arc<DashMap<u32, u32>>,
    latency: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            failures: Arc::new(DashMap::new()),
            latency: None,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next `times` PUTs of `part_number`
    pub fn fail_part(self, part_number: u32, times: u32) -> Self {
        self.failures.insert(part_number, times);
        self
    }

    /// Hold every PUT for `latency` before delivering it
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Total PUTs attempted
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of PUTs observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, url: &str) -> bool {
        let Some(part_number) = self.store.part_number_for(url) else {
            return false;
        };
        match self.failures.get_mut(&part_number) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl PartTransport for MemoryTransport {
    async fn put(&self, url: &str, content_type: &str, body: Bytes) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = if self.scripted_failure(url) {
            Err(TransportError::Connection("connection reset".to_string()))
        } else {
            self.store.receive(url, content_type, body).map(|_| ())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multipart_round_trip_assembles_in_order() {
        let store = MemoryStore::new("bucket");
        let key = ObjectKey::new("uploads/a.pdf");
        let txn = store.create_multipart(&key, "application/pdf").await.unwrap();

        let url2 = store
            .presign_part(&key, &txn, 2, Duration::from_secs(60))
            .await
            .unwrap();
        let url1 = store
            .presign_part(&key, &txn, 1, Duration::from_secs(60))
            .await
            .unwrap();
        let etag2 = store.receive(&url2, "application/octet-stream", Bytes::from_static(b"world")).unwrap();
        let etag1 = store.receive(&url1, "application/octet-stream", Bytes::from_static(b"hello ")).unwrap();

        let listed = store.list_parts(&key, &txn).await.unwrap();
        assert_eq!(listed.len(), 2);

        store
            .complete_multipart(
                &key,
                &txn,
                vec![
                    CompletedPart { part_number: 1, etag: etag1 },
                    CompletedPart { part_number: 2, etag: etag2 },
                ],
            )
            .await
            .unwrap();

        let object = store.object(&key).unwrap();
        assert_eq!(&object.bytes[..], b"hello world");
        assert!(object.etag.ends_with("-2\""));
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn single_put_must_match_signed_content_type() {
        let store = MemoryStore::new("bucket");
        let key = ObjectKey::new("uploads/b.pdf");
        let url = store
            .presign_put(&key, "application/pdf", Duration::from_secs(60))
            .await
            .unwrap();

        let wrong = store.receive(&url, "text/plain", Bytes::from_static(b"x"));
        assert!(matches!(wrong, Err(TransportError::Status { status: 403, .. })));

        store.receive(&url, "application/pdf", Bytes::from_static(b"x")).unwrap();
        assert_eq!(store.object(&key).unwrap().content_type, "application/pdf");
    }

    #[tokio::test]
    async fn expired_url_is_rejected() {
        let store = MemoryStore::new("bucket");
        let key = ObjectKey::new("uploads/c.pdf");
        let txn = store.create_multipart(&key, "application/pdf").await.unwrap();
        let url = store
            .presign_part(&key, &txn, 1, Duration::ZERO)
            .await
            .unwrap();
        // Expiry has one-second resolution
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let result = store.receive(&url, "application/octet-stream", Bytes::from_static(b"x"));
        assert!(matches!(result, Err(TransportError::Status { status: 403, .. })));
    }

    #[tokio::test]
    async fn aborted_transaction_refuses_parts() {
        let store = MemoryStore::new("bucket");
        let key = ObjectKey::new("uploads/d.pdf");
        let txn = store.create_multipart(&key, "application/pdf").await.unwrap();
        let url = store
            .presign_part(&key, &txn, 1, Duration::from_secs(60))
            .await
            .unwrap();
        store.abort_multipart(&key, &txn).await.unwrap();

        let result = store.receive(&url, "application/octet-stream", Bytes::from_static(b"x"));
        assert!(matches!(result, Err(TransportError::Status { status: 403, .. })));
        assert_eq!(store.abort_count(), 1);
        assert_eq!(store.outstanding_grants(), 0);
    }

    #[tokio::test]
    async fn grants_are_released_once_settled() {
        let store = MemoryStore::new("bucket");

        let key = ObjectKey::new("uploads/e.pdf");
        let url = store
            .presign_put(&key, "application/pdf", Duration::from_secs(60))
            .await
            .unwrap();
        store.receive(&url, "application/pdf", Bytes::from_static(b"x")).unwrap();
        assert_eq!(store.outstanding_grants(), 0);

        let key = ObjectKey::new("uploads/f.pdf");
        let txn = store.create_multipart(&key, "application/pdf").await.unwrap();
        let url = store
            .presign_part(&key, &txn, 1, Duration::from_secs(60))
            .await
            .unwrap();
        let etag = store.receive(&url, "application/octet-stream", Bytes::from_static(b"y")).unwrap();
        // Part URLs stay valid for retries until the transaction settles
        assert_eq!(store.outstanding_grants(), 1);

        store
            .complete_multipart(&key, &txn, vec![CompletedPart { part_number: 1, etag }])
            .await
            .unwrap();
        assert_eq!(store.outstanding_grants(), 0);
    }

    #[tokio::test]
    async fn expired_grants_are_swept_on_next_issue() {
        let store = MemoryStore::new("bucket");
        let key = ObjectKey::new("uploads/g.pdf");
        store
            .presign_put(&key, "application/pdf", Duration::ZERO)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        store
            .presign_put(&key, "application/pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.outstanding_grants(), 1);
    }
}
