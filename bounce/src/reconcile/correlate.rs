//! # Correlation
//!
//! This module resolves a notification back to the outbound record it
//! talks about. The envelope identifier is authoritative when the
//! reporting server sent it back, otherwise recent records are
//! scanned for the queue and message identifiers left in the
//! notification.

use chrono::{Duration, Utc};
use tracing::debug;

use crate::{
    notification::{candidates::extract_candidate_ids, Notification},
    record::OutboundStore,
    AnyResult,
};

use super::apply::apply_notification;

/// How far back the candidate scan looks for outbound records.
const FALLBACK_WINDOW_DAYS: i64 = 30;

/// How many outbound records the candidate scan considers at most.
const FALLBACK_SCAN_LIMIT: usize = 1000;

/// Correlate the notification to an outbound record and apply its
/// verdicts onto it.
///
/// Returns the identifier of the updated record, or [`None`] when the
/// notification does not resolve to any record this instance owns.
pub(crate) async fn correlate_and_apply(
    store: &dyn OutboundStore,
    notification: &Notification,
    raw: &str,
) -> AnyResult<Option<String>> {
    if let Some(id) = &notification.envelope_id {
        if apply_notification(store, id, notification, raw).await? {
            return Ok(Some(id.clone()));
        }

        debug!("envelope id {id} did not resolve, falling back to candidate scan");
    }

    let ids = extract_candidate_ids(raw, &notification.text);
    if ids.is_empty() {
        return Ok(None);
    }

    let since = Utc::now() - Duration::days(FALLBACK_WINDOW_DAYS);
    let records = store.list_since(since, FALLBACK_SCAN_LIMIT).await?;

    for record in records {
        if !record.matches_any_identifier(&ids) {
            continue;
        }

        if apply_notification(store, &record.id, notification, raw).await? {
            return Ok(Some(record.id));
        }
    }

    Ok(None)
}
