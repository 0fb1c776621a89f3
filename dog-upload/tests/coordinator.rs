use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dog_upload::{
    FinalizeOutcome, FinalizeRequest, InitiateResult, IntegrityTag, MemoryStore,
    MemoryTransport, ObjectKey, PartResult, PresignedPartTarget, TransactionId, TransferConfig,
    TransferMode, UploadApi, UploadConfig, UploadCoordinator, UploadError, UploadResult,
    UploadSession, DEFAULT_CHUNK_SIZE,
};

const MIB: usize = 1024 * 1024;

fn file(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn session(store: &MemoryStore, config: UploadConfig) -> Arc<UploadSession> {
    Arc::new(UploadSession::new(Arc::new(store.clone()), config))
}

fn coordinator(
    store: &MemoryStore,
    transport: MemoryTransport,
    config: TransferConfig,
) -> UploadCoordinator {
    UploadCoordinator::new(
        session(store, UploadConfig::default()),
        Arc::new(transport),
        config,
    )
}

#[tokio::test]
async fn small_file_goes_up_in_one_put() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone());
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let data = file(3 * MIB);
    let receipt = coordinator
        .upload("small.pdf", "application/pdf", data.clone())
        .await
        .unwrap();

    assert_eq!(receipt.mode, TransferMode::SinglePart);
    assert_eq!(receipt.parts, 1);
    assert_eq!(transport.calls(), 1);
    assert_eq!(store.open_transactions(), 0);
    assert_eq!(store.commit_count(), 0);

    let object = store.object(&receipt.key).unwrap();
    assert_eq!(object.bytes, data);
    assert_eq!(object.content_type, "application/pdf");
}

#[tokio::test]
async fn empty_file_is_a_single_part_upload() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone());
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let receipt = coordinator
        .upload("empty.pdf", "application/pdf", Bytes::new())
        .await
        .unwrap();

    assert_eq!(receipt.mode, TransferMode::SinglePart);
    assert_eq!(transport.calls(), 1);
    assert!(store.object(&receipt.key).unwrap().bytes.is_empty());
}

#[tokio::test]
async fn twelve_mib_file_is_committed_from_three_parts() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone());
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let data = file(12 * MIB);
    let receipt = coordinator
        .upload("report.pdf", "application/pdf", data.clone())
        .await
        .unwrap();

    assert_eq!(receipt.mode, TransferMode::Multipart);
    assert_eq!(receipt.parts, 3);
    assert_eq!(receipt.size_bytes, 12 * MIB as u64);
    assert_eq!(transport.calls(), 3);
    assert_eq!(store.commit_count(), 1);
    assert_eq!(store.open_transactions(), 0);
    assert!(receipt.key.as_str().starts_with("uploads/"));
    assert!(receipt.key.as_str().ends_with("-report.pdf"));

    let object = store.object(&receipt.key).unwrap();
    assert_eq!(object.bytes, data);
    assert_eq!(receipt.etag.as_deref(), Some(object.etag.as_str()));
}

#[tokio::test]
async fn file_of_exactly_one_chunk_uses_multipart() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone());
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let receipt = coordinator
        .upload("edge.pdf", "application/pdf", file(DEFAULT_CHUNK_SIZE as usize))
        .await
        .unwrap();

    assert_eq!(receipt.mode, TransferMode::Multipart);
    assert_eq!(receipt.parts, 1);
    assert_eq!(store.commit_count(), 1);
}

#[tokio::test]
async fn part_recovers_after_two_failures() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone()).fail_part(2, 2);
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let data = file(12 * MIB);
    let receipt = coordinator
        .upload("flaky.pdf", "application/pdf", data.clone())
        .await
        .unwrap();

    assert_eq!(transport.calls(), 5);
    assert_eq!(store.object(&receipt.key).unwrap().bytes, data);
}

#[tokio::test]
async fn exhausted_part_aborts_and_never_finalizes() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone()).fail_part(2, 3);
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let err = coordinator
        .upload("broken.pdf", "application/pdf", file(12 * MIB))
        .await
        .unwrap_err();

    match err {
        UploadError::PartUploadFailed { part_number, last_error } => {
            assert_eq!(part_number, 2);
            assert!(last_error.contains("connection reset"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.abort_count(), 1);
    assert_eq!(store.open_transactions(), 0);
}

#[tokio::test]
async fn failed_transfer_can_be_left_open() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone()).fail_part(1, 3);
    let coordinator = coordinator(
        &store,
        transport,
        TransferConfig::default().without_abort(),
    );

    let result = coordinator
        .upload("broken.pdf", "application/pdf", file(12 * MIB))
        .await;

    assert!(matches!(result, Err(UploadError::PartUploadFailed { .. })));
    assert_eq!(store.abort_count(), 0);
    assert_eq!(store.open_transactions(), 1);
}

#[tokio::test]
async fn presign_failure_stops_before_any_put() {
    let store = MemoryStore::new("docs");
    store.fail_presign_for_part(3);
    let transport = MemoryTransport::new(store.clone());
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let err = coordinator
        .upload("report.pdf", "application/pdf", file(12 * MIB))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::PresignIssuanceFailed { .. }));
    assert_eq!(transport.calls(), 0);
    assert_eq!(store.abort_count(), 1);
}

#[tokio::test]
async fn unavailable_backend_fails_initiate() {
    let store = MemoryStore::new("docs");
    store.set_unavailable(true);
    let transport = MemoryTransport::new(store.clone());
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let err = coordinator
        .upload("report.pdf", "application/pdf", file(12 * MIB))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::BackendUnavailable { .. }));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn fan_out_respects_concurrency_limit() {
    let store = MemoryStore::new("docs");
    let transport =
        MemoryTransport::new(store.clone()).with_latency(Duration::from_millis(20));
    let coordinator = UploadCoordinator::new(
        session(&store, UploadConfig::default().with_chunk_size(1024)),
        Arc::new(transport.clone()),
        TransferConfig::default()
            .with_chunk_size(1024)
            .with_part_concurrency(2),
    );

    let data = file(10 * 1024);
    let receipt = coordinator
        .upload("many.pdf", "application/pdf", data.clone())
        .await
        .unwrap();

    assert_eq!(receipt.parts, 10);
    assert_eq!(transport.calls(), 10);
    assert!(transport.peak_in_flight() <= 2);
    assert_eq!(store.object(&receipt.key).unwrap().bytes, data);
}

#[tokio::test]
async fn chunk_size_disagreement_is_rejected() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone());
    let coordinator = coordinator(
        &store,
        transport.clone(),
        TransferConfig::default().with_chunk_size(MIB as u64),
    );

    let err = coordinator
        .upload("report.pdf", "application/pdf", file(3 * MIB))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Invalid { .. }));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn file_rules_are_enforced_at_initiate() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone());
    let coordinator = UploadCoordinator::new(
        session(&store, UploadConfig::default().with_max_file_bytes(4 * MIB as u64)),
        Arc::new(transport.clone()),
        TransferConfig::default(),
    );

    let too_big = coordinator
        .upload("big.pdf", "application/pdf", file(5 * MIB))
        .await;
    assert!(matches!(too_big, Err(UploadError::Invalid { .. })));

    let wrong_type = coordinator
        .upload("notes.txt", "text/plain", file(10))
        .await;
    assert!(matches!(wrong_type, Err(UploadError::Invalid { .. })));

    assert_eq!(transport.calls(), 0);
    assert_eq!(store.open_transactions(), 0);
}

/// Session wrapper with scripted failures on individual actions.
struct ScriptedApi {
    session: Arc<UploadSession>,
    reject_part_numbers: bool,
    fail_abort: bool,
}

impl ScriptedApi {
    fn new(store: &MemoryStore) -> Self {
        Self {
            session: session(store, UploadConfig::default()),
            reject_part_numbers: false,
            fail_abort: false,
        }
    }
}

#[async_trait]
impl UploadApi for ScriptedApi {
    async fn initiate(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> UploadResult<InitiateResult> {
        UploadApi::initiate(self.session.as_ref(), file_name, file_size, content_type).await
    }

    async fn get_part_targets(
        &self,
        transaction_id: &TransactionId,
        key: &ObjectKey,
        part_numbers: &[u32],
    ) -> UploadResult<Vec<PresignedPartTarget>> {
        if self.reject_part_numbers {
            return Err(UploadError::invalid("partNumbers out of range"));
        }
        UploadApi::get_part_targets(self.session.as_ref(), transaction_id, key, part_numbers)
            .await
    }

    async fn finalize(&self, request: &FinalizeRequest) -> UploadResult<FinalizeOutcome> {
        UploadApi::finalize(self.session.as_ref(), request).await
    }

    async fn abort(&self, transaction_id: &TransactionId, key: &ObjectKey) -> UploadResult<()> {
        if self.fail_abort {
            return Err(UploadError::backend_message("abort refused"));
        }
        UploadApi::abort(self.session.as_ref(), transaction_id, key).await
    }
}

#[tokio::test]
async fn server_multipart_against_local_single_part_is_aborted() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone());
    // Server splits at 5 MiB, client at 8 MiB
    let coordinator = coordinator(
        &store,
        transport.clone(),
        TransferConfig::default().with_chunk_size(8 * MIB as u64),
    );

    let err = coordinator
        .upload("report.pdf", "application/pdf", file(6 * MIB))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Invalid { .. }));
    assert_eq!(transport.calls(), 0);
    assert_eq!(store.abort_count(), 1);
    assert_eq!(store.open_transactions(), 0);
}

#[tokio::test]
async fn rejected_part_numbers_abort_the_transaction() {
    let store = MemoryStore::new("docs");
    let api = ScriptedApi {
        reject_part_numbers: true,
        ..ScriptedApi::new(&store)
    };
    let transport = MemoryTransport::new(store.clone());
    let coordinator = UploadCoordinator::new(
        Arc::new(api),
        Arc::new(transport.clone()),
        TransferConfig::default(),
    );

    let err = coordinator
        .upload("report.pdf", "application/pdf", file(12 * MIB))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Invalid { .. }));
    assert_eq!(transport.calls(), 0);
    assert_eq!(store.open_transactions(), 0);
}

#[tokio::test]
async fn failed_abort_keeps_the_part_error() {
    let store = MemoryStore::new("docs");
    let api = ScriptedApi {
        fail_abort: true,
        ..ScriptedApi::new(&store)
    };
    let coordinator = UploadCoordinator::new(
        Arc::new(api),
        Arc::new(MemoryTransport::new(store.clone()).fail_part(3, 3)),
        TransferConfig::default(),
    );

    let err = coordinator
        .upload("broken.pdf", "application/pdf", file(12 * MIB))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::PartUploadFailed { part_number: 3, .. }));
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.open_transactions(), 1);
}

#[tokio::test]
async fn failed_single_put_is_not_retried() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone()).fail_part(1, 1);
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    let err = coordinator
        .upload("small.pdf", "application/pdf", file(3 * MIB))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::PartUploadFailed { part_number: 1, .. }));
    assert_eq!(transport.calls(), 1);
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.abort_count(), 0);
}

#[tokio::test]
async fn empty_content_type_is_rejected_before_initiate() {
    let store = MemoryStore::new("docs");
    let transport = MemoryTransport::new(store.clone());
    let coordinator = coordinator(&store, transport.clone(), TransferConfig::default());

    for size in [3 * MIB, 12 * MIB] {
        let err = coordinator
            .upload("report.pdf", " ", file(size))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Invalid { .. }));
    }

    assert_eq!(transport.calls(), 0);
    assert_eq!(store.open_transactions(), 0);
    assert_eq!(store.outstanding_grants(), 0);
}

/// Drive the session by hand to tamper with the finalize claim.
async fn open_with_two_parts(
    store: &MemoryStore,
    session: &UploadSession,
) -> (dog_upload::TransactionId, dog_upload::ObjectKey, Vec<PartResult>) {
    use dog_upload::{InitiateResult, PartTransport};

    let initiated = session
        .initiate_for_file("claim.pdf", 8 * MIB as u64, Some("application/pdf"))
        .await
        .unwrap();
    let InitiateResult::Multipart { object_key, transaction_id } = initiated else {
        panic!("expected multipart");
    };

    let targets = session
        .get_part_targets(&transaction_id, &object_key, &[1, 2])
        .await
        .unwrap();
    let transport = MemoryTransport::new(store.clone());
    let mut results = Vec::new();
    for (target, body) in targets.iter().zip([file(5 * MIB), file(3 * MIB)]) {
        let tag = IntegrityTag::compute(&body);
        transport
            .put(&target.url, "application/octet-stream", body)
            .await
            .unwrap();
        results.push(PartResult::new(target.part_number, tag));
    }
    (transaction_id, object_key, results)
}

#[tokio::test]
async fn finalize_rejects_wrong_tag_and_leaves_transaction_open() {
    let store = MemoryStore::new("docs");
    let session = UploadSession::new(Arc::new(store.clone()), UploadConfig::default());
    let (txn, key, mut parts) = open_with_two_parts(&store, &session).await;

    parts[1] = PartResult::new(2, IntegrityTag::from_raw("\"00000000000000000000000000000000\""));
    let err = session.finalize(&txn, &key, &parts).await.unwrap_err();

    match err {
        UploadError::MissingOrMismatchedParts { parts } => {
            assert_eq!(parts.len(), 1);
            assert_eq!(parts[0].part_number, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.object(&key).is_none());
    assert_eq!(store.open_transactions(), 1);
}

#[tokio::test]
async fn finalize_rejects_part_the_backend_lost() {
    let store = MemoryStore::new("docs");
    let session = UploadSession::new(Arc::new(store.clone()), UploadConfig::default());
    let (txn, key, parts) = open_with_two_parts(&store, &session).await;

    store.discard_part(&txn, 1);
    let err = session.finalize(&txn, &key, &parts).await.unwrap_err();

    assert!(matches!(err, UploadError::MissingOrMismatchedParts { .. }));
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn finalize_accepts_parts_in_any_order() {
    let store = MemoryStore::new("docs");
    let session = UploadSession::new(Arc::new(store.clone()), UploadConfig::default());
    let (txn, key, mut parts) = open_with_two_parts(&store, &session).await;

    parts.reverse();
    let outcome = session.finalize(&txn, &key, &parts).await.unwrap();

    assert_eq!(outcome.parts, 2);
    let object = store.object(&key).unwrap();
    let mut expected = file(5 * MIB).to_vec();
    expected.extend_from_slice(&file(3 * MIB));
    assert_eq!(object.bytes.to_vec(), expected);
}

#[tokio::test]
async fn finalize_rejects_duplicate_part_numbers() {
    let store = MemoryStore::new("docs");
    let session = UploadSession::new(Arc::new(store.clone()), UploadConfig::default());
    let (txn, key, parts) = open_with_two_parts(&store, &session).await;

    let duplicated = vec![parts[0].clone(), parts[0].clone()];
    let err = session.finalize(&txn, &key, &duplicated).await.unwrap_err();

    assert!(matches!(err, UploadError::Invalid { .. }));
    assert_eq!(store.open_transactions(), 1);
}
