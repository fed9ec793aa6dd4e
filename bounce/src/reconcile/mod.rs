//! # Reconciliation
//!
//! Module dedicated to the reconciliation of outbound email delivery
//! status. The main structure of this module is [`ReconcileBuilder`]:
//! one call to [`ReconcileBuilder::reconcile`] runs one pass over the
//! bounce mailbox of the account and folds every notification it can
//! correlate back into the outbound records.

mod apply;
mod correlate;
pub mod error;
pub mod report;

use std::{env, fmt, fs::OpenOptions, future::Future, pin::Pin, sync::Arc};

use advisory_lock::{AdvisoryFileLock, FileLockError, FileLockMode};
use chrono::Utc;
use tracing::{debug, error, info, trace, warn};

use crate::{
    account::AccountConfig,
    mailbox::{pop3::Pop3Session, MailboxMessage, MailboxSession},
    notification::Notification,
    record::OutboundStore,
    tracking::{FailureRecord, TrackingStore},
    AnyResult,
};

use self::correlate::correlate_and_apply;

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    report::{ReconcileOutcome, ReconcileReport},
};

/// How many processing failures a mailbox message is allowed before
/// the pass evicts it as a poison pill.
pub const POISON_PILL_THRESHOLD: u32 = 3;

/// What happened to a single mailbox message.
enum MessageOutcome {
    Matched,
    Unmatched,
    Evicted,
}

/// The reconciliation builder.
///
/// The builder wires an account to its outbound and tracking stores,
/// then runs passes on demand. Running passes of the same account
/// from two places at the same time is prevented with a lock file.
#[derive(Clone)]
pub struct ReconcileBuilder {
    account_config: Arc<AccountConfig>,
    outbound: Arc<dyn OutboundStore>,
    tracking: Arc<dyn TrackingStore>,
    handler: Option<Arc<ReconcileEventHandler>>,
}

impl ReconcileBuilder {
    /// Create a new reconciliation builder using the given account
    /// configuration and stores.
    pub fn new(
        account_config: Arc<AccountConfig>,
        outbound: Arc<dyn OutboundStore>,
        tracking: Arc<dyn TrackingStore>,
    ) -> Self {
        Self {
            account_config,
            outbound,
            tracking,
            handler: None,
        }
    }

    pub fn set_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: Option<impl Fn(ReconcileEvent) -> F + Send + Sync + 'static>,
    ) {
        self.handler = match handler {
            Some(handler) => Some(Arc::new(move |evt| Box::pin(handler(evt)))),
            None => None,
        };
    }

    pub fn set_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: impl Fn(ReconcileEvent) -> F + Send + Sync + 'static,
    ) {
        self.set_some_handler(Some(handler));
    }

    pub fn with_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: Option<impl Fn(ReconcileEvent) -> F + Send + Sync + 'static>,
    ) -> Self {
        self.set_some_handler(handler);
        self
    }

    pub fn with_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: impl Fn(ReconcileEvent) -> F + Send + Sync + 'static,
    ) -> Self {
        self.set_handler(handler);
        self
    }

    /// Run one reconciliation pass.
    ///
    /// The pass takes the account lock first, so concurrent passes of
    /// the same account skip instead of fighting over the mailbox.
    pub async fn reconcile(self) -> Result<ReconcileReport> {
        let lock_file_name = format!("bounce-reconcile.{}.lock", self.account_config.name);
        let lock_file_path = env::temp_dir().join(lock_file_name);

        debug!("locking reconciliation file {lock_file_path:?}");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_file_path)
            .map_err(|err| Error::OpenLockFileError(err, lock_file_path.clone()))?;

        // called through the trait, std::fs::File has grown inherent
        // locking methods with the same names
        match AdvisoryFileLock::try_lock(&lock_file, FileLockMode::Exclusive) {
            Ok(()) => (),
            Err(FileLockError::AlreadyLocked) => {
                info!(
                    "reconciliation of account {} already running, skipping",
                    self.account_config.name
                );
                return Ok(ReconcileReport {
                    outcome: ReconcileOutcome::Skipped,
                    ..Default::default()
                });
            }
            Err(err) => return Err(Error::LockFileError(err, lock_file_path)),
        }

        let report = self.run_pass().await;

        debug!("unlocking reconciliation file");
        AdvisoryFileLock::unlock(&lock_file)
            .map_err(|err| Error::UnlockFileError(err, lock_file_path))?;

        Ok(report)
    }

    async fn run_pass(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let Some(mailbox_config) = self.account_config.find_mailbox_config() else {
            info!(
                "account {} has no usable bounce mailbox, skipping",
                self.account_config.name
            );
            report.outcome = ReconcileOutcome::Skipped;
            return report;
        };

        debug!(
            "connecting to the bounce mailbox of account {}",
            self.account_config.name
        );
        let mut session = match Pop3Session::connect(mailbox_config).await {
            Ok(session) => session,
            Err(err) => {
                error!("cannot connect to the bounce mailbox: {err}");
                debug!("{err:?}");
                report.outcome = ReconcileOutcome::Error;
                return report;
            }
        };

        self.process_mailbox(&mut session, &mut report).await;

        // deletions only commit on a clean close, and a mailbox left
        // locked by a dangling session would starve the next pass
        if let Err(err) = session.close().await {
            warn!("cannot close the bounce mailbox session safely: {err}");
        }

        report
    }

    async fn process_mailbox(&self, session: &mut dyn MailboxSession, report: &mut ReconcileReport) {
        let messages = match session.list().await {
            Ok(messages) => messages,
            Err(err) => {
                error!("cannot list bounce mailbox messages: {err}");
                debug!("{err:?}");
                report.outcome = ReconcileOutcome::Error;
                return;
            }
        };

        report.found = messages.len();
        info!("found {} bounce mailbox messages", report.found);
        ReconcileEvent::ListedMessages(report.found)
            .emit(&self.handler)
            .await;

        if messages.is_empty() {
            report.outcome = ReconcileOutcome::Empty;
            return;
        }

        for message in messages {
            match self.process_message(session, &message).await {
                Ok(MessageOutcome::Matched) => report.matched += 1,
                Ok(MessageOutcome::Unmatched) => report.unmatched += 1,
                Ok(MessageOutcome::Evicted) => report.evicted += 1,
                Err(err) => {
                    error!(
                        "cannot process bounce mailbox message {}: {err}",
                        message.uid
                    );
                    debug!("{err:?}");
                    report.failed += 1;
                    ReconcileEvent::FailedMessage(message.uid.clone())
                        .emit(&self.handler)
                        .await;

                    if self.isolate_failure(session, &message).await {
                        report.evicted += 1;
                    }
                }
            }
        }

        report.outcome = ReconcileOutcome::Processed;
    }

    async fn process_message(
        &self,
        session: &mut dyn MailboxSession,
        message: &MailboxMessage,
    ) -> AnyResult<MessageOutcome> {
        if let Some(failure) = self.tracking.find(&message.uid).await? {
            // a pass that crashed right after the eviction threshold
            // leaves the counter behind, finish the job first
            if failure.failure_count >= POISON_PILL_THRESHOLD {
                error!(
                    "bounce mailbox message {} already failed {} times, evicting",
                    message.uid, failure.failure_count
                );
                session.delete(message.sequence_id).await?;
                self.tracking.delete(&message.uid).await?;
                ReconcileEvent::EvictedPoisonMessage(message.uid.clone())
                    .emit(&self.handler)
                    .await;
                return Ok(MessageOutcome::Evicted);
            }
        }

        let raw = session.retrieve(message.sequence_id).await?;
        let notification = Notification::parse(&raw)?;
        let raw = String::from_utf8_lossy(&raw);

        match correlate_and_apply(self.outbound.as_ref(), &notification, &raw).await? {
            Some(record_id) => {
                info!(
                    "bounce mailbox message {} matched outbound record {record_id}",
                    message.uid
                );
                session.delete(message.sequence_id).await?;
                self.tracking.delete(&message.uid).await?;
                ReconcileEvent::MatchedNotification(message.uid.clone(), record_id)
                    .emit(&self.handler)
                    .await;
                Ok(MessageOutcome::Matched)
            }
            None => {
                info!(
                    "bounce mailbox message {} did not match any outbound record, keeping it",
                    message.uid
                );
                ReconcileEvent::UnmatchedNotification(message.uid.clone())
                    .emit(&self.handler)
                    .await;
                Ok(MessageOutcome::Unmatched)
            }
        }
    }

    /// Count one processing failure of the given message, evicting it
    /// once it crosses the poison pill threshold.
    ///
    /// Returns `true` when the message was evicted. Tracking store
    /// failures only warn, losing one count is better than failing
    /// the pass.
    async fn isolate_failure(
        &self,
        session: &mut dyn MailboxSession,
        message: &MailboxMessage,
    ) -> bool {
        let failure = match self.tracking.find(&message.uid).await {
            Ok(Some(mut failure)) => {
                failure.failure_count += 1;
                failure.last_attempt = Utc::now();
                failure
            }
            Ok(None) => FailureRecord::new(&message.uid),
            Err(err) => {
                warn!(
                    "cannot track failure of bounce mailbox message {}: {err}",
                    message.uid
                );
                return false;
            }
        };

        let count = failure.failure_count;

        if let Err(err) = self.tracking.upsert(failure).await {
            warn!(
                "cannot track failure of bounce mailbox message {}: {err}",
                message.uid
            );
            return false;
        }

        if count < POISON_PILL_THRESHOLD {
            debug!(
                "bounce mailbox message {} failed {count} times, keeping it",
                message.uid
            );
            return false;
        }

        error!(
            "bounce mailbox message {} failed {count} times, evicting",
            message.uid
        );

        if let Err(err) = session.delete(message.sequence_id).await {
            warn!("cannot evict bounce mailbox message {}: {err}", message.uid);
            return false;
        }

        if let Err(err) = self.tracking.delete(&message.uid).await {
            warn!(
                "cannot clear failure tracking of bounce mailbox message {}: {err}",
                message.uid
            );
        }

        ReconcileEvent::EvictedPoisonMessage(message.uid.clone())
            .emit(&self.handler)
            .await;

        true
    }
}

/// The reconciliation async event handler.
pub type ReconcileEventHandler =
    dyn Fn(ReconcileEvent) -> Pin<Box<dyn Future<Output = AnyResult<()>> + Send>> + Send + Sync;

/// The reconciliation event.
///
/// Represents all the events that can be triggered during a
/// reconciliation pass.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ReconcileEvent {
    ListedMessages(usize),
    MatchedNotification(String, String),
    UnmatchedNotification(String),
    FailedMessage(String),
    EvictedPoisonMessage(String),
}

impl ReconcileEvent {
    pub async fn emit(&self, handler: &Option<Arc<ReconcileEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(self.clone()).await {
                debug!("error while emitting reconciliation event: {err}");
                trace!("{err:?}");
            } else {
                debug!("emitted reconciliation event {self:?}");
            }
        }
    }
}

impl fmt::Display for ReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileEvent::ListedMessages(n) => {
                write!(f, "Listed {n} bounce messages")
            }
            ReconcileEvent::MatchedNotification(uid, record_id) => {
                write!(f, "Matched bounce message {uid} to record {record_id}")
            }
            ReconcileEvent::UnmatchedNotification(uid) => {
                write!(f, "Kept unmatched bounce message {uid}")
            }
            ReconcileEvent::FailedMessage(uid) => {
                write!(f, "Failed to process bounce message {uid}")
            }
            ReconcileEvent::EvictedPoisonMessage(uid) => {
                write!(f, "Evicted poison bounce message {uid}")
            }
        }
    }
}
