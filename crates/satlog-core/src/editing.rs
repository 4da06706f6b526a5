//! Single-record edits outside of batch import.
//!
//! An update goes through the same resolve, normalize and validate steps as
//! an imported record, so a zoneless start time is still read as civil time.
//! Both edits need the ingest capability.

use std::sync::Arc;

use satlog_normalize::{prepare, ValidationPolicy};
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::{AccessGate, Capability};
use crate::error::EditError;
use crate::store::{RecordStore, StoredRecord};

#[derive(Clone)]
pub struct RecordEditor {
    store: Arc<dyn RecordStore>,
    gate: Arc<dyn AccessGate>,
    validation: ValidationPolicy,
}

impl RecordEditor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<dyn AccessGate>,
        validation: ValidationPolicy,
    ) -> Self {
        Self {
            store,
            gate,
            validation,
        }
    }

    fn authorize(&self, credential: Option<&str>, action: &str) -> Result<(), EditError> {
        self.gate
            .check(credential, Capability::Ingest)
            .map_err(|denied| {
                warn!(error = %denied, action, "record edit rejected");
                EditError::from(denied)
            })
    }

    /// Replaces record `id` with the prepared form of `raw`.
    pub async fn update(
        &self,
        id: i64,
        raw: &Value,
        credential: Option<&str>,
    ) -> Result<StoredRecord, EditError> {
        self.authorize(credential, "update")?;

        let record = prepare(raw, &self.validation).map_err(EditError::Rejected)?;
        let stored = self
            .store
            .update(id, &record)
            .await?
            .ok_or(EditError::NotFound(id))?;

        info!(id, plan_id = ?stored.record.plan_id, "record updated");
        Ok(stored)
    }

    pub async fn delete(&self, id: i64, credential: Option<&str>) -> Result<(), EditError> {
        self.authorize(credential, "delete")?;

        if !self.store.delete(id).await? {
            return Err(EditError::NotFound(id));
        }
        info!(id, "record deleted");
        Ok(())
    }

    pub async fn delete_by_plan(
        &self,
        plan_id: &str,
        credential: Option<&str>,
    ) -> Result<u64, EditError> {
        self.authorize(credential, "delete")?;

        let removed = self.store.delete_by_plan(plan_id).await?;
        if removed == 0 {
            return Err(EditError::PlanNotFound(plan_id.to_string()));
        }
        info!(plan_id, removed, "record deleted");
        Ok(removed)
    }
}
