use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info};

use crate::store::CompletedPart;
use crate::{
    normalize_tag, FinalizeOutcome, MultipartStore, ObjectKey, PartResult, RecordedPart,
    TransactionId, UploadError, UploadResult,
};

/// Cross-checks client claims against the backend before committing.
#[derive(Clone)]
pub struct FinalizeVerifier {
    store: Arc<dyn MultipartStore>,
}

impl FinalizeVerifier {
    pub fn new(store: Arc<dyn MultipartStore>) -> Self {
        Self { store }
    }

    /// Verify `parts` against the backend and, on a clean match, commit.
    pub async fn finalize(
        &self,
        transaction_id: &TransactionId,
        object_key: &ObjectKey,
        parts: &[PartResult],
    ) -> UploadResult<FinalizeOutcome> {
        let recorded = self.store.list_parts(object_key, transaction_id).await?;

        let missing = missing_parts(parts, &recorded);
        if !missing.is_empty() {
            error!(
                key = %object_key,
                upload_id = %transaction_id,
                missing = missing.len(),
                "Refusing to commit: parts missing or with mismatched ETags"
            );
            return Err(UploadError::MissingOrMismatchedParts { parts: missing });
        }

        let mut ordered: Vec<CompletedPart> = parts
            .iter()
            .map(|p| CompletedPart {
                part_number: p.part_number,
                etag: p.integrity_tag.as_str().to_string(),
            })
            .collect();
        ordered.sort_by_key(|p| p.part_number);

        let count = ordered.len() as u32;
        let commit = self
            .store
            .complete_multipart(object_key, transaction_id, ordered)
            .await?;

        info!(key = %object_key, parts = count, "Multipart upload committed");

        Ok(FinalizeOutcome {
            key: object_key.clone(),
            etag: commit.etag,
            location: commit.location,
            parts: count,
        })
    }
}

/// Submitted parts with no `(part_number, tag)` match in `recorded`.
///
/// Tags are compared with quotes stripped from both sides.
pub fn missing_parts(submitted: &[PartResult], recorded: &[RecordedPart]) -> Vec<PartResult> {
    let known: HashSet<(u32, String)> = recorded
        .iter()
        .map(|p| (p.part_number, normalize_tag(&p.etag)))
        .collect();

    submitted
        .iter()
        .filter(|p| !known.contains(&(p.part_number, p.integrity_tag.normalized())))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IntegrityTag;
    use proptest::prelude::*;

    fn submitted(n: u32, tag: &str) -> PartResult {
        PartResult::new(n, IntegrityTag::from_raw(tag))
    }

    fn recorded(n: u32, tag: &str) -> RecordedPart {
        RecordedPart {
            part_number: n,
            etag: tag.to_string(),
            size_bytes: 1,
        }
    }

    #[test]
    fn unrecorded_part_is_reported() {
        let missing = missing_parts(
            &[submitted(1, "\"abc\""), submitted(2, "\"def\"")],
            &[recorded(1, "\"abc\"")],
        );
        assert_eq!(missing, vec![submitted(2, "\"def\"")]);
    }

    #[test]
    fn quotes_do_not_cause_mismatch() {
        assert!(missing_parts(&[submitted(1, "\"ABC\"")], &[recorded(1, "ABC")]).is_empty());
        assert!(missing_parts(&[submitted(1, "ABC")], &[recorded(1, "\"ABC\"")]).is_empty());
    }

    #[test]
    fn tag_on_wrong_part_number_is_a_mismatch() {
        let missing = missing_parts(&[submitted(2, "abc")], &[recorded(1, "abc")]);
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn extra_recorded_parts_are_ignored() {
        let missing = missing_parts(
            &[submitted(1, "a")],
            &[recorded(1, "a"), recorded(2, "b")],
        );
        assert!(missing.is_empty());
    }

    proptest! {
        #[test]
        fn empty_iff_every_submitted_pair_is_recorded(
            recorded_tags in proptest::collection::vec("[0-9a-f]{4}", 1..20),
            picks in proptest::collection::vec((0usize..40, any::<bool>(), any::<bool>()), 0..20),
        ) {
            let backend: Vec<RecordedPart> = recorded_tags
                .iter()
                .enumerate()
                .map(|(i, t)| recorded(i as u32 + 1, &format!("\"{}\"", t)))
                .collect();

            // Build submissions that either reference a recorded part or a
            // part number beyond the recorded range.
            let claims: Vec<PartResult> = picks
                .iter()
                .map(|(idx, quoted, corrupt)| {
                    let n = *idx as u32 + 1;
                    let base = recorded_tags.get(*idx).cloned().unwrap_or_else(|| "zzzz".to_string());
                    let tag = if *corrupt { format!("{}x", base) } else { base };
                    let tag = if *quoted { format!("\"{}\"", tag) } else { tag };
                    submitted(n, &tag)
                })
                .collect();

            let expected_ok = claims.iter().all(|c| {
                backend.iter().any(|r| {
                    r.part_number == c.part_number && c.integrity_tag.matches(&r.etag)
                })
            });

            prop_assert_eq!(missing_parts(&claims, &backend).is_empty(), expected_ok);
        }
    }
}
