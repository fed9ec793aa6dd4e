//! # Notification
//!
//! Module dedicated to the notifications found in the bounce mailbox.
//! A notification is usually a structured delivery status report, but
//! free-form bounces exist in the wild, so classification relies on
//! subject and body heuristics refined by the report action when one
//! is present.

pub mod candidates;
pub mod dsn;
pub mod error;

use mail_parser::{HeaderValue, MessageParser};
use once_cell::sync::Lazy;
use regex::Regex;

use self::dsn::Dsn;

#[doc(inline)]
pub use self::error::{Error, Result};

/// Matches the envelope identifier when it only shows up in the body
/// of the report.
static ENVELOPE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Original-Envelope-Id:\s*([A-Za-z0-9-]+)").unwrap());

/// The delivery verdict of a single recipient.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecipientVerdict {
    /// The recipient address the verdict applies to.
    pub email: String,

    /// Whether delivery to this recipient completed.
    pub is_success: bool,

    /// The delivery status fields of the recipient's block.
    pub dsn: Dsn,
}

/// A parsed notification from the bounce mailbox.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    /// The subject of the notification.
    pub subject: String,

    /// The plain text body of the notification, falling back to the
    /// HTML body.
    pub text: String,

    /// Whether the notification reports a completed delivery.
    pub is_success: bool,

    /// The envelope identifier of the original message, when the
    /// reporting server sent it back.
    pub envelope_id: Option<String>,

    /// The per-recipient verdicts, one per per-recipient block of the
    /// report. Empty for single-verdict notifications.
    pub recipients: Vec<RecipientVerdict>,

    /// The delivery status fields of the notification, when the
    /// message carries some.
    pub dsn: Option<Dsn>,
}

impl Notification {
    /// Parse a notification out of a raw mailbox message.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let message = MessageParser::new()
            .parse(raw)
            .ok_or(Error::ParseMessageError)?;
        let raw_text = String::from_utf8_lossy(raw);

        let subject = message.subject().unwrap_or_default().to_owned();
        let text = message
            .body_text(0)
            .or_else(|| message.body_html(0))
            .map(|body| body.into_owned())
            .unwrap_or_default();

        let envelope_id = match message.header("Original-Envelope-Id") {
            Some(HeaderValue::Text(id)) => Some(id.trim().to_owned()),
            _ => ENVELOPE_ID
                .captures(&raw_text)
                .map(|caps| caps[1].to_owned()),
        };

        let dsn = Dsn::parse(&raw_text);

        let recipients = Dsn::parse_recipient_blocks(&raw_text)
            .into_iter()
            .filter_map(|dsn| {
                let email = dsn
                    .final_recipient
                    .clone()
                    .or_else(|| dsn.original_recipient.clone())?;
                let is_success = dsn.action.is_success();
                Some(RecipientVerdict {
                    email,
                    is_success,
                    dsn,
                })
            })
            .collect();

        let is_success = determine_success(&subject, &text, dsn.as_ref());

        Ok(Self {
            subject,
            text,
            is_success,
            envelope_id,
            recipients,
            dsn,
        })
    }

    /// Build the human readable summary of the notification, stored
    /// as the error of failed delivery attempts.
    pub fn summary(&self) -> String {
        format!(
            "Delivery Status Notification. Subject: {}.\n\nReason:\n{}",
            self.subject,
            self.text.trim()
        )
    }
}

/// Classify the notification as success or failure.
///
/// Failure wins over success when both sets of markers are present,
/// and the report action has the last word.
fn determine_success(subject: &str, text: &str, dsn: Option<&Dsn>) -> bool {
    let subject = subject.to_lowercase();
    let text = text.to_lowercase();

    let is_failure = text.contains("action: failed")
        || subject.contains("undelivered")
        || subject.contains("failure")
        || subject.contains("returned to sender");

    let mut is_success = !is_failure
        && (subject.contains("successful")
            || subject.contains("delivered")
            || text.contains("successfully delivered")
            || text.contains("status: 2.0.0")
            || text.contains("action: relayed")
            || text.contains("action: delivered"));

    if let Some(dsn) = dsn {
        if dsn.action.is_failure() {
            is_success = false;
        } else if dsn.action.is_success() {
            is_success = true;
        }
    }

    is_success
}

#[cfg(test)]
mod tests {
    use concat_with::concat_line;

    use crate::notification::dsn::DsnAction;

    use super::*;

    fn failure_report() -> String {
        concat_line!(
            "From: MAILER-DAEMON@mx.example.com",
            "To: sender@example.com",
            "Subject: Undelivered Mail Returned to Sender",
            "Content-Type: multipart/report; report-type=delivery-status; boundary=\"b1\"",
            "",
            "--b1",
            "Content-Type: text/plain; charset=utf-8",
            "",
            "This is the mail system at host mx.example.com.",
            "",
            "Your message could not be delivered to one or more recipients.",
            "",
            "--b1",
            "Content-Type: message/delivery-status",
            "",
            "Reporting-MTA: dns; mx.example.com",
            "Original-Envelope-Id: rec-1",
            "",
            "Final-Recipient: rfc822; jane@example.net",
            "Action: failed",
            "Status: 5.1.1",
            "Diagnostic-Code: smtp; 550 5.1.1 user unknown",
            "",
            "--b1--",
            ""
        )
        .to_owned()
    }

    #[test]
    fn parse_failure_report() {
        let notification = Notification::parse(failure_report().as_bytes()).unwrap();

        assert!(!notification.is_success);
        assert_eq!(notification.subject, "Undelivered Mail Returned to Sender");
        assert_eq!(notification.envelope_id.as_deref(), Some("rec-1"));
        assert!(notification.text.contains("could not be delivered"));

        let dsn = notification.dsn.as_ref().unwrap();
        assert_eq!(dsn.action, DsnAction::Failed);
        assert_eq!(dsn.status.as_deref(), Some("5.1.1"));

        assert_eq!(notification.recipients.len(), 1);
        assert_eq!(notification.recipients[0].email, "jane@example.net");
        assert!(!notification.recipients[0].is_success);
    }

    #[test]
    fn failure_markers_win_over_success_markers() {
        let raw = concat_line!(
            "From: MAILER-DAEMON@mx.example.com",
            "Subject: Undelivered Mail Returned to Sender",
            "",
            "Your message was delivered to the relay but then bounced.",
        );

        let notification = Notification::parse(raw.as_bytes()).unwrap();

        assert!(!notification.is_success);
    }

    #[test]
    fn success_is_detected_from_the_body() {
        let raw = concat_line!(
            "From: postmaster@mx.example.com",
            "Subject: Delivery report",
            "",
            "Your message was successfully delivered to jane@example.net.",
        );

        let notification = Notification::parse(raw.as_bytes()).unwrap();

        assert!(notification.is_success);
        assert_eq!(notification.envelope_id, None);
        assert!(notification.recipients.is_empty());
        assert_eq!(notification.dsn, None);
    }

    #[test]
    fn report_action_has_the_last_word() {
        let raw = concat_line!(
            "From: postmaster@mx.example.com",
            "Subject: Delivery report",
            "Content-Type: multipart/report; report-type=delivery-status; boundary=\"b1\"",
            "",
            "--b1",
            "Content-Type: text/plain; charset=utf-8",
            "",
            "Your message was successfully delivered, then expired from the relay.",
            "",
            "--b1",
            "Content-Type: message/delivery-status",
            "",
            "Reporting-MTA: dns; mx.example.com",
            "",
            "Final-Recipient: rfc822; jane@example.net",
            "Action: failed",
            "Status: 5.7.1",
            "",
            "--b1--",
            ""
        );

        let notification = Notification::parse(raw.as_bytes()).unwrap();

        // the text part claims success, the status part decides
        assert!(!notification.is_success);
    }

    #[test]
    fn summary_embeds_subject_and_body() {
        let notification = Notification::parse(failure_report().as_bytes()).unwrap();
        let summary = notification.summary();

        assert!(summary.starts_with(
            "Delivery Status Notification. Subject: Undelivered Mail Returned to Sender."
        ));
        assert!(summary.contains("Reason:\nThis is the mail system"));
    }
}
