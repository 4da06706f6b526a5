//! Batch ingest coordinator.
//!
//! One batch runs inside one store transaction:
//! `Begin -> {per record: resolve -> normalize -> validate -> stage} -> Commit | Rollback`.
//! A record that fails normalization or validation is reported and skipped;
//! only store faults and timeouts abort the batch.

use std::sync::Arc;
use std::time::Duration;

use blake3::Hasher;
use satlog_normalize::{prepare_resolved, resolve, RejectedRecord, ValidationPolicy};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn, Instrument};
use uuid::Uuid;

use crate::auth::{AccessGate, Capability};
use crate::config::IngestConfig;
use crate::error::{IngestError, StoreError};
use crate::store::{BatchAudit, DuplicatePolicy, IngestTransaction, RecordStore, StageAction};

#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub records: Vec<Value>,
    /// Falls back to the coordinator's configured policy.
    pub policy: Option<DuplicatePolicy>,
    /// Run the whole pipeline but roll back instead of committing.
    pub dry_run: bool,
    pub credential: Option<String>,
}

/// Result of one input record, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<StageAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The start-time value exactly as submitted; `null` when there was none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_value: Option<Value>,
}

impl ImportOutcome {
    fn staged(index: usize, action: StageAction) -> Self {
        Self {
            index,
            success: true,
            action: Some(action),
            kind: None,
            error: None,
            original_value: None,
        }
    }

    fn rejected(index: usize, rejected: RejectedRecord) -> Self {
        Self {
            index,
            success: false,
            action: None,
            kind: Some(rejected.failure.kind()),
            error: Some(rejected.failure.to_string()),
            original_value: Some(rejected.original_value.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub dry_run: bool,
    pub policy: DuplicatePolicy,
    /// blake3 digest of the submitted records.
    pub digest: String,
    pub total_attempted: usize,
    pub inserted_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub outcomes: Vec<ImportOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &ImportOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.success)
    }
}

#[derive(Clone)]
pub struct IngestCoordinator {
    store: Arc<dyn RecordStore>,
    gate: Arc<dyn AccessGate>,
    validation: ValidationPolicy,
    max_batch: usize,
    timeout: Duration,
    default_policy: DuplicatePolicy,
}

impl IngestCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<dyn AccessGate>,
        config: &IngestConfig,
        validation: ValidationPolicy,
    ) -> Self {
        Self {
            store,
            gate,
            validation,
            max_batch: config.max_batch,
            timeout: config.timeout(),
            default_policy: config.duplicate_policy,
        }
    }

    pub fn default_policy(&self) -> DuplicatePolicy {
        self.default_policy
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Runs one batch. Authorization and size checks happen before any
    /// transaction is opened.
    pub async fn ingest(&self, request: IngestRequest) -> Result<BatchReport, IngestError> {
        if let Err(denied) = self
            .gate
            .check(request.credential.as_deref(), Capability::Ingest)
        {
            warn!(error = %denied, "import rejected");
            return Err(denied.into());
        }

        let size = request.records.len();
        if size > self.max_batch {
            warn!(size, limit = self.max_batch, "import rejected: batch too large");
            return Err(IngestError::BatchTooLarge {
                size,
                limit: self.max_batch,
            });
        }
        if size == 0 {
            return Err(IngestError::EmptyBatch);
        }

        let batch_id = Uuid::new_v4();
        let policy = request.policy.unwrap_or(self.default_policy);
        let span = tracing::info_span!(
            "ingest_batch",
            %batch_id,
            records = size,
            %policy,
            dry_run = request.dry_run
        );

        let run = self
            .run_batch(batch_id, policy, request.dry_run, &request.records)
            .instrument(span.clone());

        // Dropping the future on timeout drops the open transaction, which
        // rolls it back.
        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                span.in_scope(|| {
                    error!(timeout = ?self.timeout, "batch timed out; transaction rolled back")
                });
                Err(IngestError::Timeout(self.timeout))
            }
        }
    }

    async fn run_batch(
        &self,
        batch_id: Uuid,
        policy: DuplicatePolicy,
        dry_run: bool,
        records: &[Value],
    ) -> Result<BatchReport, IngestError> {
        let digest = batch_digest(records);
        let mut tx = self.store.begin().await?;
        info!("batch transaction opened");

        let mut report = BatchReport {
            batch_id,
            dry_run,
            policy,
            digest,
            total_attempted: records.len(),
            inserted_count: 0,
            updated_count: 0,
            skipped_count: 0,
            failed_count: 0,
            outcomes: Vec::with_capacity(records.len()),
        };

        for (index, raw) in records.iter().enumerate() {
            let resolved = resolve(raw);
            if !resolved.gaps.is_empty() {
                trace!(index, gaps = ?resolved.gaps, "unresolved fields default to null");
            }

            let record = match prepare_resolved(resolved, &self.validation) {
                Ok(record) => record,
                Err(rejected) => {
                    debug!(
                        index,
                        kind = rejected.failure.kind(),
                        reason = %rejected.failure,
                        "record rejected"
                    );
                    report.failed_count += 1;
                    report.outcomes.push(ImportOutcome::rejected(index, rejected));
                    continue;
                }
            };

            let action = match tx.stage(&record, policy).await {
                Ok(action) => action,
                Err(err) => {
                    error!(index, error = %err, "staging failed; rolling back batch");
                    abandon(tx).await;
                    return Err(err.into());
                }
            };

            match action {
                StageAction::Inserted => report.inserted_count += 1,
                StageAction::Updated => report.updated_count += 1,
                StageAction::Skipped => report.skipped_count += 1,
            }
            report.outcomes.push(ImportOutcome::staged(index, action));
        }

        if dry_run {
            tx.rollback().await?;
            info!(
                inserted = report.inserted_count,
                updated = report.updated_count,
                skipped = report.skipped_count,
                failed = report.failed_count,
                "dry run finished; transaction rolled back"
            );
            return Ok(report);
        }

        let audit = BatchAudit {
            batch_id,
            digest: report.digest.clone(),
            policy,
            total: report.total_attempted,
            inserted: report.inserted_count,
            updated: report.updated_count,
            skipped: report.skipped_count,
            failed: report.failed_count,
        };
        if let Err(err) = tx.record_batch(&audit).await {
            error!(error = %err, "writing batch audit failed; rolling back batch");
            abandon(tx).await;
            return Err(err.into());
        }

        commit(tx).await?;
        info!(
            inserted = report.inserted_count,
            updated = report.updated_count,
            skipped = report.skipped_count,
            failed = report.failed_count,
            "batch committed"
        );
        Ok(report)
    }
}

async fn commit(tx: Box<dyn IngestTransaction>) -> Result<(), StoreError> {
    tx.commit().await.inspect_err(|err| {
        error!(error = %err, "commit failed");
    })
}

async fn abandon(tx: Box<dyn IngestTransaction>) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "explicit rollback failed; the transaction is discarded on drop");
    }
}

fn batch_digest(records: &[Value]) -> String {
    let mut hasher = Hasher::new();
    for record in records {
        hasher.update(record.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_depends_on_content_and_order() {
        let a = json!({"计划ID": "P1"});
        let b = json!({"计划ID": "P2"});
        let first = batch_digest(&[a.clone(), b.clone()]);

        assert_eq!(first, batch_digest(&[a.clone(), b.clone()]));
        assert_ne!(first, batch_digest(&[b, a]));
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn rejected_outcome_serializes_original_value() {
        let rejected = satlog_normalize::prepare(
            &json!({"开始时间": "not-a-date"}),
            &ValidationPolicy::default(),
        )
        .unwrap_err();

        let outcome = serde_json::to_value(ImportOutcome::rejected(1, rejected)).unwrap();
        assert_eq!(outcome["index"], json!(1));
        assert_eq!(outcome["success"], json!(false));
        assert_eq!(outcome["kind"], json!("normalization"));
        assert_eq!(outcome["originalValue"], json!("not-a-date"));
        assert!(outcome["error"].as_str().unwrap().contains("not-a-date"));
        assert!(outcome.get("action").is_none());
    }

    #[test]
    fn staged_outcome_is_minimal() {
        let outcome = serde_json::to_value(ImportOutcome::staged(0, StageAction::Inserted)).unwrap();
        assert_eq!(
            outcome,
            json!({"index": 0, "success": true, "action": "inserted"})
        );
    }
}
