//! # Failure tracking
//!
//! Module dedicated to the failure tracking of mailbox messages. A
//! message that keeps breaking the pass is counted here across
//! invocations, then evicted once it reaches the poison pill
//! threshold so one bad message cannot wedge the mailbox forever.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::AnyResult;

/// The processing failure counter of a single mailbox message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The stable identifier of the mailbox message.
    pub uid: String,

    /// How many passes failed to process the message.
    pub failure_count: u32,

    /// When the message last failed.
    pub last_attempt: DateTime<Utc>,
}

impl FailureRecord {
    /// Create a counter for a message failing for the first time.
    pub fn new(uid: impl ToString) -> Self {
        Self {
            uid: uid.to_string(),
            failure_count: 1,
            last_attempt: Utc::now(),
        }
    }
}

/// The storage failure counters live in.
///
/// Counters must survive between passes, otherwise a crashing message
/// would be retried forever.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Find the counter of the given mailbox message.
    async fn find(&self, uid: &str) -> AnyResult<Option<FailureRecord>>;

    /// Create or replace the counter of a mailbox message.
    async fn upsert(&self, record: FailureRecord) -> AnyResult<()>;

    /// Drop the counter of the given mailbox message.
    async fn delete(&self, uid: &str) -> AnyResult<()>;
}

/// The in-memory implementation of the failure tracking store.
#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    records: Mutex<HashMap<String, FailureRecord>>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, uid: &str) -> Option<FailureRecord> {
        let records = self.records.lock().await;
        records.get(uid).cloned()
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn find(&self, uid: &str) -> AnyResult<Option<FailureRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(uid).cloned())
    }

    async fn upsert(&self, record: FailureRecord) -> AnyResult<()> {
        let mut records = self.records.lock().await;
        records.insert(record.uid.clone(), record);
        Ok(())
    }

    async fn delete(&self, uid: &str) -> AnyResult<()> {
        let mut records = self.records.lock().await;
        records.remove(uid);
        Ok(())
    }
}
