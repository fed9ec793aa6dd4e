//! # Outbound record
//!
//! Module dedicated to outbound email records. A record is written at
//! submission time, one per outgoing email, and carries one delivery
//! attempt per recipient. Reconciliation updates attempts in place
//! when a notification is correlated back to its record.

pub mod store;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::notification::dsn::Dsn;

#[doc(inline)]
pub use self::store::{MemoryOutboundStore, OutboundStore};

/// Matches an address wrapped in angle brackets.
static BRACKETED_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^<>\s]+@[^<>\s]+)>").unwrap());

/// The overall delivery status of an outbound record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Success,
    Error,
}

/// The delivery attempt of a single recipient.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubmissionAttempt {
    /// The recipient of the attempt, as given at submission time.
    pub to: String,

    /// Whether the attempt is considered delivered.
    pub success: bool,

    /// The submission or delivery error, if any.
    pub error: Option<String>,

    /// The response of the submission server.
    pub response: Option<SubmissionResponse>,

    /// Whether a bounce notification has been correlated back to this
    /// attempt.
    pub bounce_report: bool,

    /// The delivery status fields of the correlated notification.
    pub dsn: Option<Dsn>,

    /// When the correlated notification was processed.
    pub dsn_received_at: Option<DateTime<Utc>>,
}

/// The response returned by the submission server.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
    pub envelope_time: Option<u64>,
    pub message_time: Option<u64>,
    pub message_size: Option<u64>,

    /// The raw server reply, like `250 2.0.0 Ok: queued as ABC123`.
    pub response: Option<String>,

    /// The message identifier generated at submission time.
    pub message_id: Option<String>,

    pub envelope: Option<SubmissionEnvelope>,
}

/// The envelope the submission server accepted.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubmissionEnvelope {
    pub from: Option<String>,
    pub to: Vec<String>,
}

/// An outbound email record.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutboundRecord {
    /// The unique identifier of the record, used as the envelope
    /// identifier of the outgoing email.
    pub id: String,

    /// The recipients of the outgoing email.
    pub to: Vec<String>,

    /// The subject of the outgoing email.
    pub subject: String,

    /// When the record was written.
    pub created_at: DateTime<Utc>,

    /// The delivery attempts, one per recipient.
    pub attempts: Vec<SubmissionAttempt>,

    /// The raw source of correlated notifications, most recent first.
    pub raw_dsn_mail: Option<String>,

    /// The overall delivery status of the record.
    pub delivery_status: Option<DeliveryStatus>,

    /// When the last notification was correlated.
    pub dsn_received_at: Option<DateTime<Utc>>,
}

impl OutboundRecord {
    /// Check whether any of the given identifiers shows up in the
    /// delivery attempts of this record.
    ///
    /// Attempts are matched as a whole, serialized to JSON, so an
    /// identifier is found wherever the submission server left it.
    /// Identifiers only match on word boundaries, a short queue id
    /// never matches inside a longer one.
    pub fn matches_any_identifier(&self, ids: &HashSet<String>) -> bool {
        if self.attempts.is_empty() || ids.is_empty() {
            return false;
        }

        let attempts = match serde_json::to_string(&self.attempts) {
            Ok(attempts) => attempts,
            Err(err) => {
                debug!("cannot serialize attempts of record {}: {err}", self.id);
                return false;
            }
        };

        for id in ids {
            let pattern = format!(r"\b{}\b", regex::escape(id));
            match Regex::new(&pattern) {
                Ok(regex) if regex.is_match(&attempts) => return true,
                Ok(_) => (),
                Err(err) => {
                    debug!("cannot compile pattern for candidate id {id}: {err}");
                }
            }
        }

        false
    }
}

/// Extract the bare email address out of a recipient field.
///
/// Returns the inner address when the field uses the display name
/// form, the trimmed field otherwise, and [`None`] when nothing
/// usable remains.
pub fn extract_email_address(addr: &str) -> Option<&str> {
    if let Some(caps) = BRACKETED_ADDRESS.captures(addr) {
        return Some(caps.get(1)?.as_str());
    }

    if addr.contains('<') || addr.contains('>') {
        return None;
    }

    let addr = addr.trim();
    if addr.is_empty() {
        None
    } else {
        Some(addr)
    }
}

/// Check whether two recipient fields designate the same address.
pub fn addresses_match(left: &str, right: &str) -> bool {
    match (extract_email_address(left), extract_email_address(right)) {
        (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
        _ => false,
    }
}
