//! Rust library to reconcile outbound email delivery status.
//!
//! The main purpose of this library is to correlate bounce and
//! delivery status notifications collected from a POP3 mailbox with
//! previously sent outbound email records, and to update the
//! per-recipient delivery status of those records.
//!
//! This goal is achieved by exposing a
//! [`ReconcileBuilder`](crate::reconcile::ReconcileBuilder) which
//! runs one reconciliation pass at a time: it lists the bounce
//! mailbox, parses every notification, correlates each one to an
//! outbound record and applies its verdicts. Outbound records and
//! failure tracking records live behind the
//! [`OutboundStore`](crate::record::store::OutboundStore) and
//! [`TrackingStore`](crate::tracking::TrackingStore) traits, so any
//! persistence layer can be plugged in.
//!
//! Messages that cannot be correlated stay in the mailbox and are
//! examined again by the next pass: the mailbox itself is the retry
//! queue. Messages that repeatedly fail processing are evicted after
//! a bounded number of attempts.
//!
//! See examples in the /tests folder.

pub mod account;
mod error;
pub mod mailbox;
pub mod notification;
pub mod reconcile;
pub mod record;
pub mod tracking;

#[doc(inline)]
pub use self::error::{AnyBoxedError, AnyError, AnyResult};
