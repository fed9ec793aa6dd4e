//! # Correlation candidates
//!
//! Module dedicated to the extraction of candidate identifiers from a
//! notification. When a report carries no envelope identifier, the
//! only way left to correlate it is to collect every token that looks
//! like a message or queue identifier and match them against recent
//! outbound records.
//!
//! Extraction is deliberately permissive: precision comes from the
//! whole-token matching done on the record side, not from here.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches the left part of a message identifier, as sent back inside
/// the returned copy of the original message.
static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Message-ID:\s*<?([^@>\s]+)").unwrap());

/// Matches the queue identifier quoted by relays in their acceptance
/// response, like `250 2.0.0 Ok: queued as 4XYZ12abcd`.
static QUEUED_AS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)queued as\s*([A-Za-z0-9_-]+)").unwrap());

/// Matches the Postfix queue identifier header of returned messages.
static POSTFIX_QUEUE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)X-Postfix-Queue-ID:\s*([A-Za-z0-9_-]+)").unwrap());

/// Matches the submission identifier quoted by Received headers.
static ESMTPSA_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)with ESMTPSA id\s*([A-Za-z0-9_-]+)").unwrap());

/// Collect every candidate identifier found in the notification.
///
/// Both the raw message and the decoded text body are scanned, since
/// transfer encodings can hide identifiers from the raw form.
pub fn extract_candidate_ids(raw: &str, text: &str) -> HashSet<String> {
    let mut ids = HashSet::new();

    for source in [raw, text] {
        for regex in [&MESSAGE_ID, &QUEUED_AS, &POSTFIX_QUEUE_ID] {
            for caps in regex.captures_iter(source) {
                ids.insert(caps[1].to_owned());
            }
        }
    }

    // Received headers are never re-encoded, the raw form is enough
    for caps in ESMTPSA_ID.captures_iter(raw) {
        ids.insert(caps[1].to_owned());
    }

    ids
}

#[cfg(test)]
mod tests {
    use concat_with::concat_line;

    use super::*;

    #[test]
    fn extract_from_raw_and_text() {
        let raw = concat_line!(
            "Received: from relay.example.com with ESMTPSA id k9LMnOpQ",
            "X-Postfix-Queue-ID: 4XYZ12abcd",
            "",
            "250 2.0.0 Ok: queued as 8AbCd123",
            "Message-ID: <msg-42@mail.example.com>",
        );
        let text = "your message was queued as deadbeef by the relay";

        let ids = extract_candidate_ids(raw, text);

        assert!(ids.contains("k9LMnOpQ"));
        assert!(ids.contains("4XYZ12abcd"));
        assert!(ids.contains("8AbCd123"));
        assert!(ids.contains("msg-42"));
        assert!(ids.contains("deadbeef"));
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn message_id_stops_at_the_domain() {
        let ids = extract_candidate_ids("Message-ID: <abc123@mail.example.com>", "");

        assert!(ids.contains("abc123"));
        assert!(!ids.contains("abc123@mail.example.com"));
    }

    #[test]
    fn submission_id_is_only_read_from_the_raw_form() {
        let ids = extract_candidate_ids("", "delivered with ESMTPSA id zzz999");

        assert!(ids.is_empty());
    }
}
