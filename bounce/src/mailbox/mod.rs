//! # Mailbox
//!
//! Module dedicated to the bounce mailbox. The mailbox is where the
//! upstream mail server drops delivery status notifications for the
//! messages this system previously sent.
//!
//! The mailbox is accessed through the [`MailboxSession`] trait so
//! the reconciliation engine does not depend on a given protocol. The
//! only implementation shipped with the library is the POP3 one, in
//! [`pop3`].

pub mod config;
pub mod pop3;

use async_trait::async_trait;

use crate::AnyResult;

/// The handle of a message available in the mailbox.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MailboxMessage {
    /// The server-assigned unique identifier of the message.
    ///
    /// The identifier is stable across sessions, which makes it the
    /// right key for tracking processing failures of a given message
    /// from one pass to the next.
    pub uid: String,

    /// The session-local sequence identifier of the message.
    ///
    /// Only valid within the session that listed it.
    pub sequence_id: u32,
}

/// The mailbox session.
///
/// A session is established once per reconciliation pass and must be
/// closed exactly once, whatever happened in between: deletions are
/// only committed by the server at close time.
#[async_trait]
pub trait MailboxSession: Send + Sync {
    /// List all messages available in the mailbox.
    async fn list(&mut self) -> AnyResult<Vec<MailboxMessage>>;

    /// Download the full raw content of the given message.
    async fn retrieve(&mut self, sequence_id: u32) -> AnyResult<Vec<u8>>;

    /// Mark the given message as deleted.
    ///
    /// The deletion only takes effect when the session is closed.
    async fn delete(&mut self, sequence_id: u32) -> AnyResult<()>;

    /// Close the session, committing pending deletions.
    async fn close(&mut self) -> AnyResult<()>;
}
