// src/storage/history_store.rs
//! Verification history storage.
//!
//! Append-only record of completed verifications, keyed by verifier and read
//! back newest-first. Records are never updated or deleted and are retained
//! for the lifetime of the store.

use crate::models::subject::AccountId;
use crate::models::verification::VerificationRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Upper bound on records returned by a single history query.
pub const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence port for verification records.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends a record under its verifier.
    async fn append(&self, record: VerificationRecord) -> Result<(), StoreError>;

    /// Up to `limit` records for `verifier`, newest first. `limit` is
    /// clamped to `1..=MAX_PAGE_SIZE`.
    async fn list_by_verifier(&self, verifier: AccountId, limit: usize) -> Result<Vec<VerificationRecord>, StoreError>;
}

/// Process-local history store.
///
/// This store provides:
/// - Concurrent appends behind a single async `RwLock`
/// - Per-verifier insertion-ordered vectors, sorted on read
/// - Unbounded retention (nothing is ever evicted)
#[derive(Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<HashMap<AccountId, Vec<VerificationRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl InMemoryHistoryStore {
    /// Total number of stored records across all verifiers.
    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: VerificationRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .entry(record.verifier_id)
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list_by_verifier(&self, verifier: AccountId, limit: usize) -> Result<Vec<VerificationRecord>, StoreError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let records = self.records.read().await;
        let Some(history) = records.get(&verifier) else {
            return Ok(Vec::new());
        };

        let mut page: Vec<VerificationRecord> = history.clone();
        // Stable sort keeps insertion order between equal timestamps.
        page.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        page.truncate(limit);
        Ok(page)
    }
}
