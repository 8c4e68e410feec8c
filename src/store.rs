//! Record store trait and an in-memory implementation.

use crate::email::EmailRecord;
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::RwLock;

/// Ordering of query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Most recently inserted first.
    #[default]
    Newest,
    /// Highest `iu_score` first, newest first within a score.
    Score,
}

/// Filter for reading stored records.
#[derive(Debug, Clone, Default)]
pub struct EmailQuery {
    pub unread_only: bool,
    pub min_score: Option<u8>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

/// Persistent table of ingested messages keyed by provider message id.
pub trait RecordStore: Send + Sync {
    /// Whether a record with this provider message id exists.
    fn exists(&self, message_id: &str) -> Result<bool>;

    /// Insert all records in one transaction.
    ///
    /// Either every record is stored or none is. A record whose message id is
    /// already present, or appears twice in `records`, fails the whole batch.
    fn insert_batch(&self, records: &[EmailRecord]) -> Result<usize>;

    /// Look up a single record by provider message id.
    fn get_by_message_id(&self, message_id: &str) -> Result<Option<EmailRecord>>;

    /// Read records matching a filter.
    fn query(&self, query: &EmailQuery) -> Result<Vec<EmailRecord>>;

    /// Flag records as read. Returns the number of rows changed.
    fn mark_read(&self, message_ids: &[String]) -> Result<usize>;

    /// Number of stored records.
    fn count(&self) -> Result<usize>;

    /// Flush pending state before shutdown.
    fn close(&self) {}
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<EmailRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Database("record store lock poisoned".to_string())
    }
}

impl RecordStore for MemoryStore {
    fn exists(&self, message_id: &str) -> Result<bool> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.iter().any(|r| r.message_id == message_id))
    }

    fn insert_batch(&self, batch: &[EmailRecord]) -> Result<usize> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;

        let mut ids: HashSet<&str> = records.iter().map(|r| r.message_id.as_str()).collect();
        for record in batch {
            if !ids.insert(record.message_id.as_str()) {
                return Err(Error::Database(format!(
                    "UNIQUE constraint failed: emails.message_id ({})",
                    record.message_id
                )));
            }
        }

        let now = Utc::now();
        let mut next_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        for record in batch {
            next_id += 1;
            let mut stored = record.clone();
            stored.id = next_id;
            stored.created_at = Some(now);
            records.push(stored);
        }
        Ok(batch.len())
    }

    fn get_by_message_id(&self, message_id: &str) -> Result<Option<EmailRecord>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.iter().find(|r| r.message_id == message_id).cloned())
    }

    fn query(&self, query: &EmailQuery) -> Result<Vec<EmailRecord>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        let mut matched: Vec<EmailRecord> = records
            .iter()
            .filter(|r| !query.unread_only || !r.is_read)
            .filter(|r| query.min_score.map_or(true, |min| r.iu_score >= min))
            .cloned()
            .collect();
        drop(records);

        match query.order {
            SortOrder::Newest => matched.sort_by(|a, b| b.id.cmp(&a.id)),
            SortOrder::Score => {
                matched.sort_by(|a, b| b.iu_score.cmp(&a.iu_score).then(b.id.cmp(&a.id)));
            }
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    fn mark_read(&self, message_ids: &[String]) -> Result<usize> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let mut changed = 0;
        for record in records.iter_mut() {
            if !record.is_read && message_ids.contains(&record.message_id) {
                record.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.records.read().map_err(|_| Self::poisoned())?.len())
    }
}
