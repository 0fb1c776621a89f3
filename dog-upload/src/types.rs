use serde::{Deserialize, Serialize};

/// Key of the object being written, unique per transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(pub String);

impl ObjectKey {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, backend-issued handle of a multipart transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a transfer moves its bytes. Decided once, at initiate time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    SinglePart,
    Multipart,
}

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One planned chunk of a multipart transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    /// 1-based; determines reassembly order at commit
    pub part_number: u32,
    pub range: ByteRange,
}

impl PartDescriptor {
    /// Borrow this part's bytes out of the whole file.
    pub fn slice(&self, file: &bytes::Bytes) -> bytes::Bytes {
        let len = file.len() as u64;
        let start = self.range.start.min(len) as usize;
        let end = self.range.end.min(len) as usize;
        file.slice(start..end)
    }
}

/// Time-limited write capability for exactly one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedPartTarget {
    pub part_number: u32,
    pub url: String,
    /// Unix seconds after which the URL is no longer honoured
    pub expires_at: i64,
}

impl PresignedPartTarget {
    pub fn new<S: Into<String>>(part_number: u32, url: S, expires_at: i64) -> Self {
        Self {
            part_number,
            url: url.into(),
            expires_at,
        }
    }
}

/// Quoted MD5 hex digest of a part's bytes, as S3 reports it in `ETag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntegrityTag(String);

impl IntegrityTag {
    /// Hash the exact bytes that will be sent.
    pub fn compute(bytes: &[u8]) -> Self {
        Self(format!("\"{:x}\"", md5::compute(bytes)))
    }

    /// Wrap a tag received from elsewhere, quoted or not.
    pub fn from_raw<S: Into<String>>(raw: S) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tag with every quote character removed
    pub fn normalized(&self) -> String {
        normalize_tag(&self.0)
    }

    /// Compare two tags ignoring quoting differences
    pub fn matches(&self, other: &str) -> bool {
        self.normalized() == normalize_tag(other)
    }
}

impl std::fmt::Display for IntegrityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strip quote characters so `"abc"` and `abc` compare equal.
pub fn normalize_tag(tag: &str) -> String {
    tag.replace('"', "")
}

/// Outcome of uploading one part
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartResult {
    pub part_number: u32,
    pub integrity_tag: IntegrityTag,
}

impl PartResult {
    pub fn new(part_number: u32, integrity_tag: IntegrityTag) -> Self {
        Self {
            part_number,
            integrity_tag,
        }
    }
}

/// A part as the storage backend has recorded it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedPart {
    pub part_number: u32,
    pub etag: String,
    pub size_bytes: u64,
}

/// What the client submits to commit a multipart transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeRequest {
    pub transaction_id: TransactionId,
    pub object_key: ObjectKey,
    pub parts: Vec<PartResult>,
}

impl FinalizeRequest {
    /// Build a request from results collected in any order.
    ///
    /// Fails unless `parts` holds exactly one result for each of
    /// `1..=expected_parts`.
    pub fn complete(
        transaction_id: TransactionId,
        object_key: ObjectKey,
        mut parts: Vec<PartResult>,
        expected_parts: u32,
    ) -> crate::UploadResult<Self> {
        parts.sort_by_key(|p| p.part_number);
        let contiguous = parts.len() == expected_parts as usize
            && parts
                .iter()
                .enumerate()
                .all(|(i, p)| p.part_number as usize == i + 1);
        if !contiguous {
            return Err(crate::UploadError::invalid(format!(
                "Expected parts 1..={} but collected {:?}",
                expected_parts,
                parts.iter().map(|p| p.part_number).collect::<Vec<_>>()
            )));
        }

        Ok(Self {
            transaction_id,
            object_key,
            parts,
        })
    }
}

/// Answer to `initiate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateResult {
    /// Whole object goes up in one PUT to `target`
    SinglePart {
        object_key: ObjectKey,
        target: PresignedPartTarget,
    },
    /// A backend transaction is open and waits for parts
    Multipart {
        object_key: ObjectKey,
        transaction_id: TransactionId,
    },
}

impl InitiateResult {
    pub fn mode(&self) -> TransferMode {
        match self {
            Self::SinglePart { .. } => TransferMode::SinglePart,
            Self::Multipart { .. } => TransferMode::Multipart,
        }
    }

    pub fn object_key(&self) -> &ObjectKey {
        match self {
            Self::SinglePart { object_key, .. } | Self::Multipart { object_key, .. } => object_key,
        }
    }
}

/// Result of committing a multipart transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub key: ObjectKey,
    pub etag: Option<String>,
    pub location: Option<String>,
    pub parts: u32,
}

/// Client-side record of one transfer in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTransfer {
    pub object_key: ObjectKey,
    pub total_size: u64,
    pub chunk_size: u64,
    pub mode: TransferMode,
    /// Present only for multipart transfers
    pub transaction_id: Option<TransactionId>,
}

/// What a caller gets back once a transfer is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub key: ObjectKey,
    pub mode: TransferMode,
    pub size_bytes: u64,
    pub parts: u32,
    pub etag: Option<String>,
    pub completed_at: i64,
}

impl TransferReceipt {
    pub fn new(transfer: &UploadTransfer, parts: u32, etag: Option<String>) -> Self {
        Self {
            key: transfer.object_key.clone(),
            mode: transfer.mode,
            size_bytes: transfer.total_size,
            parts,
            etag,
            completed_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_tag_is_quoted_md5_hex() {
        let tag = IntegrityTag::compute(b"hello");
        assert_eq!(tag.as_str(), "\"5d41402abc4b2a76b9719d911017c592\"");
        assert_eq!(tag.normalized().len(), 32);
    }

    #[test]
    fn quoting_is_ignored_when_matching() {
        let quoted = IntegrityTag::from_raw("\"ABC\"");
        assert!(quoted.matches("ABC"));
        assert!(IntegrityTag::from_raw("ABC").matches("\"ABC\""));
        assert!(!quoted.matches("abd"));
    }

    #[test]
    fn finalize_request_sorts_and_requires_every_part() {
        let parts = vec![
            PartResult::new(2, IntegrityTag::from_raw("b")),
            PartResult::new(1, IntegrityTag::from_raw("a")),
        ];
        let request = FinalizeRequest::complete(
            TransactionId::new("txn"),
            ObjectKey::new("k"),
            parts.clone(),
            2,
        )
        .unwrap();
        assert_eq!(request.parts[0].part_number, 1);
        assert_eq!(request.parts[1].part_number, 2);

        let gap = FinalizeRequest::complete(
            TransactionId::new("txn"),
            ObjectKey::new("k"),
            vec![parts[0].clone()],
            2,
        );
        assert!(gap.is_err());
    }

    #[test]
    fn part_slice_clamps_to_file() {
        let file = bytes::Bytes::from_static(b"0123456789");
        let part = PartDescriptor {
            part_number: 2,
            range: ByteRange::new(8, 16),
        };
        assert_eq!(&part.slice(&file)[..], b"89");
    }
}
