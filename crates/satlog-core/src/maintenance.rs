use tracing::warn;

use crate::auth::{AccessGate, Capability};
use crate::error::ResetError;
use crate::store::RecordStore;

/// Empties the record store. Requires the reset capability, which is
/// separate from the ingest capability.
pub async fn clear(
    store: &dyn RecordStore,
    gate: &dyn AccessGate,
    credential: Option<&str>,
) -> Result<u64, ResetError> {
    if let Err(denied) = gate.check(credential, Capability::Reset) {
        warn!(error = %denied, "clear rejected");
        return Err(denied.into());
    }

    let removed = store.clear().await?;
    warn!(removed, "record store cleared");
    Ok(removed)
}
