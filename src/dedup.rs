//! Deduplication gate between the mail source and the record store.

use crate::email::InboundMessage;
use crate::error::Result;
use crate::store::RecordStore;
use std::collections::HashSet;
use tracing::debug;

/// A fetched batch split by whether each message is already known.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Messages to classify and insert, in fetch order.
    pub fresh: Vec<InboundMessage>,
    /// Messages already stored, or repeated earlier in the same batch.
    pub skipped: Vec<InboundMessage>,
}

impl DedupOutcome {
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Partition `messages` against the store by provider message id.
///
/// Runs one existence check per distinct id. A repeated id within the batch
/// is skipped after its first occurrence so a single fetch can never insert
/// the same message twice.
pub fn partition(messages: Vec<InboundMessage>, store: &dyn RecordStore) -> Result<DedupOutcome> {
    let mut outcome = DedupOutcome::default();
    let mut seen = HashSet::with_capacity(messages.len());

    for message in messages {
        if !seen.insert(message.id.clone()) {
            debug!(message_id = %message.id, "Duplicate id within batch, skipping");
            outcome.skipped.push(message);
        } else if store.exists(&message.id)? {
            debug!(message_id = %message.id, "Already stored, skipping");
            outcome.skipped.push(message);
        } else {
            outcome.fresh.push(message);
        }
    }

    Ok(outcome)
}
