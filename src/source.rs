//! Mail source seam.

use crate::email::InboundMessage;
use crate::error::SourceError;
use async_trait::async_trait;

/// Default query for new mail.
pub const DEFAULT_QUERY: &str = "is:unread";

/// A remote mailbox the sync pipeline reads from.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetch up to `max_results` messages matching `query`.
    async fn fetch_new(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<InboundMessage>, SourceError>;

    /// Remove the unread marker from a message on the provider side.
    async fn mark_read(&self, message_id: &str) -> Result<(), SourceError>;
}
