//! # Delivery status
//!
//! Module dedicated to the machine-readable part of delivery status
//! notifications, as defined by RFC 3464. Real-world reports are
//! frequently malformed or incomplete, so fields are extracted with
//! permissive patterns rather than a strict grammar, and every field
//! is optional.

use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches the action field, the one field every report has.
static ACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Action:\s*(\S+)").unwrap());

/// Matches the status field, like `5.1.1`.
static STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Status:\s*(\S+)").unwrap());

/// Matches the final recipient field, with its optional address type.
static FINAL_RECIPIENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Final-Recipient:\s*(?:rfc822;\s*)?([^\s;]+)").unwrap());

/// Matches the original recipient field, with its optional address
/// type.
static ORIGINAL_RECIPIENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Original-Recipient:\s*(?:rfc822;\s*)?([^\s;]+)").unwrap());

static REMOTE_MTA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Remote-MTA:\s*dns;\s*(\S+)").unwrap());

static REPORTING_MTA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Reporting-MTA:\s*dns;\s*(\S+)").unwrap());

/// Matches the diagnostic code field, including folded continuation
/// lines.
static DIAGNOSTIC_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Diagnostic-Code:[ \t]*(.+(?:\r?\n[ \t]+.+)*)").unwrap());

static FOLDED_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n[ \t]+").unwrap());

/// Matches an email address wrapped in angle brackets.
static BRACKETED_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^<>\s]+@[^<>\s]+)>").unwrap());

static ARRIVAL_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Arrival-Date:[ \t]*(.+)").unwrap());

/// The action reported for a recipient by a delivery status
/// notification.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DsnAction {
    Failed,
    Delayed,
    Delivered,
    Relayed,
    Expanded,
    #[default]
    Unknown,
}

impl DsnAction {
    fn from_field(value: &str) -> Self {
        match value.trim().trim_end_matches(';').to_ascii_lowercase().as_str() {
            "failed" => Self::Failed,
            "delayed" => Self::Delayed,
            "delivered" => Self::Delivered,
            "relayed" => Self::Relayed,
            "expanded" => Self::Expanded,
            _ => Self::Unknown,
        }
    }

    /// Return `true` if the action reports a completed delivery.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered | Self::Relayed)
    }

    /// Return `true` if the action reports a failed delivery.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for DsnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => write!(f, "failed"),
            Self::Delayed => write!(f, "delayed"),
            Self::Delivered => write!(f, "delivered"),
            Self::Relayed => write!(f, "relayed"),
            Self::Expanded => write!(f, "expanded"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// The delivery status fields extracted from a notification.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Dsn {
    /// The reported action.
    pub action: DsnAction,

    /// The reported status code, like `5.1.1`.
    pub status: Option<String>,

    /// The address the reporting server tried to deliver to.
    pub final_recipient: Option<String>,

    /// The address the original message was addressed to.
    pub original_recipient: Option<String>,

    /// The address the message was forwarded to, when the diagnostic
    /// code mentions one.
    pub forwarded_to: Option<String>,

    /// The remote server involved in the delivery, falling back to
    /// the reporting server.
    pub remote_mta: Option<String>,

    /// The raw diagnostic line of the remote server.
    pub diagnostic_code: Option<String>,

    /// The date the original message arrived at the reporting server.
    pub arrival_date: Option<DateTime<Utc>>,
}

impl Dsn {
    /// Parse delivery status fields out of the given text.
    ///
    /// Returns `None` when the text carries no `Action:` field, in
    /// which case the message is not a delivery status report.
    pub fn parse(text: &str) -> Option<Self> {
        if !ACTION.is_match(text) {
            return None;
        }
        Some(parse_fields(text))
    }

    /// Parse one [`Dsn`] per per-recipient block of the given text.
    ///
    /// Per-recipient blocks are the blank line separated paragraphs
    /// carrying an `Action:` field. The leading per-message block of
    /// a report has none and is skipped.
    pub fn parse_recipient_blocks(text: &str) -> Vec<Self> {
        let text = text.replace("\r\n", "\n");
        text.split("\n\n")
            .map(str::trim)
            .filter(|block| ACTION.is_match(block))
            .map(parse_fields)
            .collect()
    }
}

fn parse_fields(text: &str) -> Dsn {
    let action = ACTION
        .captures(text)
        .map(|caps| DsnAction::from_field(&caps[1]))
        .unwrap_or_default();

    let status = capture(&STATUS, text);
    let final_recipient = capture(&FINAL_RECIPIENT, text);
    let original_recipient = capture(&ORIGINAL_RECIPIENT, text);
    let remote_mta = capture(&REMOTE_MTA, text).or_else(|| capture(&REPORTING_MTA, text));

    let diagnostic_code = DIAGNOSTIC_CODE
        .captures(text)
        .map(|caps| FOLDED_LINE.replace_all(caps[1].trim(), " ").into_owned());

    let forwarded_to = diagnostic_code
        .as_deref()
        .and_then(|diag| BRACKETED_ADDRESS.captures(diag))
        .map(|caps| caps[1].to_owned());

    let arrival_date = capture(&ARRIVAL_DATE, text).and_then(|date| {
        DateTime::parse_from_rfc2822(date.trim())
            .ok()
            .map(|date| date.with_timezone(&Utc))
    });

    Dsn {
        action,
        status,
        final_recipient,
        original_recipient,
        forwarded_to,
        remote_mta,
        diagnostic_code,
        arrival_date,
    }
}

fn capture(regex: &Regex, text: &str) -> Option<String> {
    regex.captures(text).map(|caps| caps[1].trim().to_owned())
}
