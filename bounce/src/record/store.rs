//! # Outbound record store
//!
//! This module exposes the storage abstraction outbound records are
//! read from and written back to, plus an in-memory implementation
//! used by tests and short-lived tools.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::AnyResult;

use super::OutboundRecord;

/// The storage outbound records live in.
///
/// Reconciliation only ever reads records and writes them back one at
/// a time, so implementations stay small.
#[async_trait]
pub trait OutboundStore: Send + Sync {
    /// Find the record matching the given identifier.
    async fn find_by_id(&self, id: &str) -> AnyResult<Option<OutboundRecord>>;

    /// List records created after the given instant, most recent
    /// first, up to the given limit.
    async fn list_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AnyResult<Vec<OutboundRecord>>;

    /// Write the given record back.
    async fn update(&self, record: OutboundRecord) -> AnyResult<()>;
}

/// The in-memory implementation of the outbound record store.
#[derive(Debug, Default)]
pub struct MemoryOutboundStore {
    records: Mutex<HashMap<String, OutboundRecord>>,
}

impl MemoryOutboundStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: OutboundRecord) {
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &str) -> Option<OutboundRecord> {
        let records = self.records.lock().await;
        records.get(id).cloned()
    }
}

#[async_trait]
impl OutboundStore for MemoryOutboundStore {
    async fn find_by_id(&self, id: &str) -> AnyResult<Option<OutboundRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(id).cloned())
    }

    async fn list_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AnyResult<Vec<OutboundRecord>> {
        let records = self.records.lock().await;

        let mut records: Vec<_> = records
            .values()
            .filter(|record| record.created_at >= since)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);

        Ok(records)
    }

    async fn update(&self, record: OutboundRecord) -> AnyResult<()> {
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record);
        Ok(())
    }
}
