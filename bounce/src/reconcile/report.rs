//! # Reconciliation report
//!
//! Module dedicated to the reconciliation report.

use std::fmt;

/// How a reconciliation pass ended.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReconcileOutcome {
    /// The pass did not run, either because the account has no usable
    /// bounce mailbox or because another pass holds the lock.
    Skipped,

    /// The pass ran and found no message to process.
    Empty,

    /// The pass ran over the mailbox messages.
    #[default]
    Processed,

    /// The pass could not reach the mailbox.
    Error,
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Empty => write!(f, "empty"),
            Self::Processed => write!(f, "processed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The reconciliation report.
///
/// A report is just a struct containing the outcome of the pass and
/// the counters of the processed mailbox messages.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconcileReport {
    /// The outcome of the pass.
    pub outcome: ReconcileOutcome,

    /// How many messages the mailbox listing returned.
    pub found: usize,

    /// How many messages were correlated to an outbound record.
    pub matched: usize,

    /// How many messages did not correlate to any outbound record.
    pub unmatched: usize,

    /// How many messages failed to process.
    pub failed: usize,

    /// How many messages were evicted as poison pills.
    pub evicted: usize,
}
