//! §4.9 report sink: decode a URL-safe `RefId` and mutate the matching
//! active job's `Report` field. Kept as a thin wrapper so callers (the
//! admin HTTP layer) never touch `Registry` internals directly.

use gitdeploy_types::{EngineError, Report};

use crate::registry::Registry;

/// Decode `url_safe_ref_id` and forward `report` into the matching active
/// job. 404s (as `EngineError::NotFound`) if the ref isn't running.
pub async fn set_report(
    registry: &Registry,
    url_safe_ref_id: &gitdeploy_types::UrlSafeRefId,
    report: Report,
) -> Result<(), EngineError> {
    let ref_id = url_safe_ref_id.decode()?;
    registry.set_report(&ref_id, report).await
}
