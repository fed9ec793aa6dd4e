//! # Verdict application
//!
//! This module applies the verdicts of a parsed notification onto an
//! outbound record. The record is loaded once, every matching
//! delivery attempt is rewritten, then the record is written back
//! with its new overall status and the raw notification prepended to
//! its history.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    notification::{dsn::Dsn, Notification},
    record::{addresses_match, DeliveryStatus, OutboundStore, SubmissionAttempt},
    AnyResult,
};

/// Longest raw notification kept in the record history.
const MAX_RAW_REPORT_LEN: usize = 20_000;

/// Longest raw history kept on a record.
const MAX_TOTAL_RAW_LEN: usize = 39_000;

/// Apply the notification onto the record matching the given
/// identifier.
///
/// Returns `false` when the record does not exist or when none of its
/// delivery attempts matches the notification, so correlation can
/// move on to the next candidate. Re-applying the same notification
/// returns `true` again, which lets a pass that crashed between the
/// record update and the mailbox deletion converge on retry.
pub(crate) async fn apply_notification(
    store: &dyn OutboundStore,
    id: &str,
    notification: &Notification,
    raw: &str,
) -> AnyResult<bool> {
    let Some(mut record) = store.find_by_id(id).await? else {
        info!("outbound record {id} not found, likely owned by another instance");
        return Ok(false);
    };

    let now = Utc::now();
    let summary = notification.summary();
    let mut touched = false;
    let mut is_success = notification.is_success;

    if notification.recipients.is_empty() {
        // single-verdict notification, the last attempt is the one
        // the report talks about
        if let Some(attempt) = record.attempts.last_mut() {
            write_verdict(
                attempt,
                notification.is_success,
                &summary,
                notification.dsn.clone(),
                now,
            );
            touched = true;
        }
    } else {
        for verdict in &notification.recipients {
            let mut matched = false;

            for attempt in record
                .attempts
                .iter_mut()
                .filter(|attempt| addresses_match(&attempt.to, &verdict.email))
            {
                write_verdict(
                    attempt,
                    verdict.is_success,
                    &summary,
                    Some(verdict.dsn.clone()),
                    now,
                );
                matched = true;
            }

            if matched {
                touched = true;
                is_success = verdict.is_success;
            }
        }
    }

    if !touched {
        debug!("no delivery attempt of record {id} matches the notification");
        return Ok(false);
    }

    record.delivery_status = Some(if is_success {
        DeliveryStatus::Success
    } else {
        DeliveryStatus::Error
    });
    record.dsn_received_at = Some(now);
    record.raw_dsn_mail = Some(prepend_raw_report(record.raw_dsn_mail.as_deref(), raw));

    store.update(record).await?;

    Ok(true)
}

fn write_verdict(
    attempt: &mut SubmissionAttempt,
    is_success: bool,
    summary: &str,
    dsn: Option<Dsn>,
    now: DateTime<Utc>,
) {
    attempt.success = is_success;
    attempt.bounce_report = true;
    attempt.dsn = dsn;
    attempt.dsn_received_at = Some(now);
    attempt.error = if is_success {
        None
    } else {
        Some(summary.to_owned())
    };
}

/// Prepend the raw notification to the record history, most recent
/// first, keeping both the report and the whole history bounded.
fn prepend_raw_report(existing: Option<&str>, raw: &str) -> String {
    let mut report = truncated(raw, MAX_RAW_REPORT_LEN).to_owned();
    if report.len() < raw.len() {
        report.push_str("\n... [truncated]");
    }

    let mut history = match existing {
        Some(existing) if !existing.is_empty() => format!("{report}\n\n---\n\n{existing}"),
        _ => report,
    };

    if history.len() > MAX_TOTAL_RAW_LEN {
        let mut capped = truncated(&history, MAX_TOTAL_RAW_LEN).to_owned();
        capped.push_str("\n... [truncated early bounces] ...");
        history = capped;
    }

    history
}

/// Cut the string at the given byte length, backing off to the
/// previous char boundary.
fn truncated(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        notification::{dsn::DsnAction, RecipientVerdict},
        record::{MemoryOutboundStore, OutboundRecord},
    };

    use super::*;

    fn record(id: &str, recipients: &[&str]) -> OutboundRecord {
        OutboundRecord {
            id: id.into(),
            to: recipients.iter().map(|to| (*to).to_owned()).collect(),
            subject: "Hello".into(),
            created_at: Utc::now(),
            attempts: recipients
                .iter()
                .map(|to| SubmissionAttempt {
                    to: (*to).to_owned(),
                    success: true,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn failure_notification() -> Notification {
        Notification {
            subject: "Undelivered Mail Returned to Sender".into(),
            text: "The following address failed: jane@example.net".into(),
            is_success: false,
            envelope_id: Some("rec-1".into()),
            recipients: Vec::new(),
            dsn: Some(Dsn {
                action: DsnAction::Failed,
                status: Some("5.1.1".into()),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn single_verdict_updates_the_last_attempt() {
        let store = Arc::new(MemoryOutboundStore::new());
        store
            .insert(record("rec-1", &["alice@example.net", "bob@example.net"]))
            .await;

        let updated = apply_notification(
            store.as_ref(),
            "rec-1",
            &failure_notification(),
            "raw report",
        )
        .await
        .unwrap();
        assert!(updated);

        let record = store.get("rec-1").await.unwrap();
        assert_eq!(record.delivery_status, Some(DeliveryStatus::Error));
        assert_eq!(record.raw_dsn_mail.as_deref(), Some("raw report"));
        assert!(record.dsn_received_at.is_some());

        let alice = &record.attempts[0];
        assert!(alice.success);
        assert!(!alice.bounce_report);

        let bob = &record.attempts[1];
        assert!(!bob.success);
        assert!(bob.bounce_report);
        assert_eq!(bob.dsn.as_ref().unwrap().action, DsnAction::Failed);
        assert!(bob
            .error
            .as_ref()
            .unwrap()
            .starts_with("Delivery Status Notification"));
    }

    #[tokio::test]
    async fn recipient_verdicts_update_their_attempts() {
        let store = Arc::new(MemoryOutboundStore::new());
        store
            .insert(record("rec-1", &["alice@example.net", "bob@example.net"]))
            .await;

        let mut notification = failure_notification();
        notification.recipients = vec![
            RecipientVerdict {
                email: "alice@example.net".into(),
                is_success: false,
                dsn: Dsn {
                    action: DsnAction::Failed,
                    ..Default::default()
                },
            },
            RecipientVerdict {
                email: "bob@example.net".into(),
                is_success: true,
                dsn: Dsn {
                    action: DsnAction::Relayed,
                    ..Default::default()
                },
            },
        ];

        let updated = apply_notification(store.as_ref(), "rec-1", &notification, "raw")
            .await
            .unwrap();
        assert!(updated);

        let record = store.get("rec-1").await.unwrap();

        let alice = &record.attempts[0];
        assert!(!alice.success);
        assert!(alice.error.is_some());

        let bob = &record.attempts[1];
        assert!(bob.success);
        assert_eq!(bob.error, None);
        assert_eq!(bob.dsn.as_ref().unwrap().action, DsnAction::Relayed);

        // the last applied verdict settles the overall status
        assert_eq!(record.delivery_status, Some(DeliveryStatus::Success));
    }

    #[tokio::test]
    async fn unmatched_recipients_leave_the_record_untouched() {
        let store = Arc::new(MemoryOutboundStore::new());
        store.insert(record("rec-1", &["alice@example.net"])).await;
        let before = store.get("rec-1").await.unwrap();

        let mut notification = failure_notification();
        notification.recipients = vec![RecipientVerdict {
            email: "carol@example.net".into(),
            is_success: false,
            dsn: Dsn::default(),
        }];

        let updated = apply_notification(store.as_ref(), "rec-1", &notification, "raw")
            .await
            .unwrap();

        assert!(!updated);
        assert_eq!(store.get("rec-1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn missing_records_are_not_created() {
        let store = Arc::new(MemoryOutboundStore::new());

        let updated = apply_notification(store.as_ref(), "rec-404", &failure_notification(), "raw")
            .await
            .unwrap();

        assert!(!updated);
        assert_eq!(store.get("rec-404").await, None);
    }

    #[test]
    fn reports_are_prepended_most_recent_first() {
        let history = prepend_raw_report(Some("old report"), "new report");

        assert_eq!(history, "new report\n\n---\n\nold report");
    }

    #[test]
    fn long_reports_are_truncated() {
        let raw = "a".repeat(MAX_RAW_REPORT_LEN + 5);
        let history = prepend_raw_report(None, &raw);

        assert_eq!(
            history.len(),
            MAX_RAW_REPORT_LEN + "\n... [truncated]".len()
        );
        assert!(history.ends_with("\n... [truncated]"));
    }

    #[test]
    fn history_is_capped_by_dropping_early_bounces() {
        let existing = "b".repeat(30_000);
        let raw = "a".repeat(15_000);
        let history = prepend_raw_report(Some(&existing), &raw);

        assert_eq!(
            history.len(),
            MAX_TOTAL_RAW_LEN + "\n... [truncated early bounces] ...".len()
        );
        assert!(history.starts_with(&raw));
        assert!(history.ends_with("\n... [truncated early bounces] ..."));
    }
}
