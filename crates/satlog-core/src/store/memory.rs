use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use satlog_normalize::temporal::to_civil;
use satlog_normalize::CanonicalRecord;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    BatchAudit, Category, DailyCount, DuplicatePolicy, IngestTransaction, PageRequest,
    RecordFilter, RecordPage, RecordStore, StageAction, StoredRecord,
};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    records: BTreeMap<i64, StoredRecord>,
    by_plan: HashMap<String, i64>,
    batches: Vec<BatchAudit>,
}

/// In-process store with the same duplicate and transaction semantics as
/// [`super::PgStore`]. An open batch holds the store lock until it commits
/// or is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Audit rows of committed batches, oldest first.
    pub async fn batches(&self) -> Vec<BatchAudit> {
        self.state.lock().await.batches.clone()
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl IngestTransaction for MemoryTransaction {
    async fn stage(
        &mut self,
        record: &CanonicalRecord,
        policy: DuplicatePolicy,
    ) -> Result<StageAction, StoreError> {
        let now = Utc::now();
        let working = &mut self.working;

        let existing = record
            .plan_id
            .as_ref()
            .and_then(|plan_id| working.by_plan.get(plan_id).copied());

        if let Some(id) = existing {
            return match policy {
                DuplicatePolicy::Skip => Ok(StageAction::Skipped),
                DuplicatePolicy::Upsert => {
                    let stored = working.records.get_mut(&id).ok_or_else(|| {
                        StoreError::Corrupt {
                            id,
                            reason: "plan index points at a missing record".to_string(),
                        }
                    })?;
                    stored.record = record.clone();
                    stored.updated_at = now;
                    Ok(StageAction::Updated)
                }
            };
        }

        working.next_id += 1;
        let id = working.next_id;
        if let Some(plan_id) = &record.plan_id {
            working.by_plan.insert(plan_id.clone(), id);
        }
        working.records.insert(
            id,
            StoredRecord {
                id,
                record: record.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(StageAction::Inserted)
    }

    async fn record_batch(&mut self, audit: &BatchAudit) -> Result<(), StoreError> {
        self.working.batches.push(audit.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn IngestTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError> {
        let state = self.state.lock().await;

        let mut matching: Vec<&StoredRecord> = state
            .records
            .values()
            .filter(|stored| filter.matches(&stored.record))
            .collect();
        matching.sort_by_key(|stored| (stored.record.start_time, stored.id));

        let total = matching.len() as i64;
        let records = matching
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .cloned()
            .collect();

        Ok(RecordPage { records, total })
    }

    async fn get(&self, id: i64) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn update(
        &self,
        id: i64,
        record: &CanonicalRecord,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(stored) = state.records.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(plan_id) = &record.plan_id {
            if state.by_plan.get(plan_id).is_some_and(|owner| *owner != id) {
                return Err(StoreError::PlanIdTaken {
                    plan_id: plan_id.clone(),
                });
            }
        }

        if let Some(previous) = stored.record.plan_id.take() {
            state.by_plan.remove(&previous);
        }
        if let Some(plan_id) = &record.plan_id {
            state.by_plan.insert(plan_id.clone(), id);
        }
        stored.record = record.clone();
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(removed) = state.records.remove(&id) else {
            return Ok(false);
        };
        if let Some(plan_id) = &removed.record.plan_id {
            state.by_plan.remove(plan_id);
        }
        Ok(true)
    }

    async fn delete_by_plan(&self, plan_id: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let Some(id) = state.by_plan.remove(plan_id) else {
            return Ok(0);
        };
        Ok(u64::from(state.records.remove(&id).is_some()))
    }

    async fn daily_counts(
        &self,
        category: Category,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<DailyCount>, StoreError> {
        let state = self.state.lock().await;
        let range = RecordFilter {
            start,
            end,
            ..RecordFilter::default()
        };

        let mut counts = BTreeMap::new();
        for stored in state.records.values() {
            if !range.matches(&stored.record) {
                continue;
            }
            let day = to_civil(&stored.record.start_time).date_naive();
            let value = category.value_of(&stored.record).map(str::to_string);
            *counts.entry((day, value)).or_insert(0) += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((day, category), count)| DailyCount {
                day,
                category,
                count,
            })
            .collect())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let removed = state.records.len() as u64;
        *state = State::default();
        Ok(removed)
    }
}
