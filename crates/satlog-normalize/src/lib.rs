pub mod errors;
pub mod model;
pub mod resolver;
pub mod sources;
pub mod temporal;
pub mod validation;

use serde_json::Value;

pub use errors::{
    NormalizationFailure, RecordFailure, RejectedRecord, SourceError, ValidationError,
};
pub use model::{CanonicalField, CanonicalRecord, ResolvedRecord};
pub use resolver::{resolve, FIELD_ALIASES};
pub use sources::{records_from_csv, records_from_json};
pub use temporal::{normalize, render_civil, render_rfc3339};
pub use validation::{validate, ValidationPolicy};

/// Runs one raw record through resolve, normalize and validate.
///
/// On failure the rejection carries the start-time value exactly as it was
/// found in the input.
pub fn prepare(raw: &Value, policy: &ValidationPolicy) -> Result<CanonicalRecord, RejectedRecord> {
    prepare_resolved(resolve(raw), policy)
}

/// Same as [`prepare`] for a record the caller already resolved.
pub fn prepare_resolved(
    resolved: ResolvedRecord,
    policy: &ValidationPolicy,
) -> Result<CanonicalRecord, RejectedRecord> {
    let original_value = resolved.start_time.clone();

    let reject = |failure: RecordFailure| RejectedRecord {
        failure,
        original_value: original_value.clone(),
    };

    let start_time = match &resolved.start_time {
        Some(value) => Some(normalize(value).map_err(|err| reject(err.into()))?),
        None => None,
    };

    validate(resolved, start_time, policy).map_err(|err| reject(err.into()))
}
