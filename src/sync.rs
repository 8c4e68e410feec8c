//! Sync orchestrator: fetch, deduplicate, classify, commit.

use crate::classify::ClassificationGateway;
use crate::dedup;
use crate::email::{EmailRecord, InboundMessage};
use crate::error::{Error, Result};
use crate::source::{MailSource, DEFAULT_QUERY};
use crate::store::RecordStore;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Phase of the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Fetching,
    Deduplicating,
    Classifying,
    Committing,
    Failed,
}

impl SyncState {
    /// Whether a run is between Fetching and Committing.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Ok,
    Failed,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncSummary {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, SyncStatus::Ok)
    }
}

/// Per-run fetch settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Provider search query
    pub query: String,
    /// Maximum messages fetched per run
    pub max_results: usize,
    /// Messages classified concurrently; results keep fetch order
    pub classify_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            max_results: 10,
            classify_concurrency: 1,
        }
    }
}

#[derive(Default)]
struct Progress {
    fetched: usize,
    skipped: usize,
}

/// Resets the published state if a run is dropped mid-flight.
struct StateGuard<'a>(&'a watch::Sender<SyncState>);

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            if state.is_active() {
                *state = SyncState::Idle;
                true
            } else {
                false
            }
        });
    }
}

/// The ingestion pipeline. Holds only its collaborators; every run starts
/// from scratch.
pub struct SyncPipeline {
    source: Arc<dyn MailSource>,
    gateway: ClassificationGateway,
    store: Arc<dyn RecordStore>,
    settings: SyncSettings,
    state: watch::Sender<SyncState>,
}

impl SyncPipeline {
    #[must_use]
    pub fn new(
        source: Arc<dyn MailSource>,
        gateway: ClassificationGateway,
        store: Arc<dyn RecordStore>,
        settings: SyncSettings,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            source,
            gateway,
            store,
            settings,
            state,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch phase transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Execute one run and summarize it. Failures are reported in the
    /// summary, never returned.
    pub async fn run(&self) -> SyncSummary {
        self.run_holding(()).await
    }

    /// Like [`run`](Self::run), but keeps `guard` alive until the run is
    /// over. If the run reaches Committing, the guard moves into the commit
    /// task and is released only when the transaction has finished, even if
    /// this future is dropped first.
    pub async fn run_holding<G: Send + 'static>(&self, guard: G) -> SyncSummary {
        let started = Instant::now();
        let _state = StateGuard(&self.state);
        info!(query = %self.settings.query, "Starting email sync");

        let mut progress = Progress::default();
        match self.execute(&mut progress, guard).await {
            Ok(inserted) => {
                self.enter(SyncState::Idle);
                info!(
                    fetched = progress.fetched,
                    inserted,
                    skipped = progress.skipped,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Sync complete"
                );
                SyncSummary {
                    fetched: progress.fetched,
                    inserted,
                    skipped: progress.skipped,
                    status: SyncStatus::Ok,
                    error: None,
                }
            }
            Err(e) => {
                self.enter(SyncState::Failed);
                error!(fetched = progress.fetched, "Sync failed: {e}");
                SyncSummary {
                    fetched: progress.fetched,
                    inserted: 0,
                    skipped: progress.skipped,
                    status: SyncStatus::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn enter(&self, state: SyncState) {
        debug!(?state, "Sync state");
        self.state.send_replace(state);
    }

    async fn execute<G: Send + 'static>(
        &self,
        progress: &mut Progress,
        guard: G,
    ) -> Result<usize> {
        self.enter(SyncState::Fetching);
        let messages = self
            .source
            .fetch_new(&self.settings.query, self.settings.max_results)
            .await?;
        progress.fetched = messages.len();

        if let Some(bad) = messages.iter().find(|m| m.id.trim().is_empty()) {
            return Err(Error::Contract(format!(
                "message from '{}' with subject '{}' has no provider id",
                bad.from, bad.subject
            )));
        }

        self.enter(SyncState::Deduplicating);
        let outcome = dedup::partition(messages, self.store.as_ref())?;
        progress.skipped = outcome.skipped_count();
        if outcome.fresh.is_empty() {
            return Ok(0);
        }

        self.enter(SyncState::Classifying);
        let records = self.build_records(outcome.fresh).await;

        self.enter(SyncState::Committing);
        // Runs to completion even if this future is dropped, so a
        // cancelled run never leaves a half-written batch. The guard is held
        // until the transaction ends.
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            store.insert_batch(&records)
        })
            .await
            .map_err(|e| Error::Database(format!("commit task failed: {e}")))?
    }

    async fn build_records(&self, fresh: Vec<InboundMessage>) -> Vec<EmailRecord> {
        stream::iter(fresh)
            .map(|message| self.build_record(message))
            .buffered(self.settings.classify_concurrency.max(1))
            .collect()
            .await
    }

    async fn build_record(&self, message: InboundMessage) -> EmailRecord {
        let date_sent = parse_sent_date(&message.date);
        if date_sent.is_none() && !message.date.is_empty() {
            warn!(message_id = %message.id, raw_date = %message.date, "Unparseable date, storing null");
        }

        let classification = self.gateway.classify(&message.body, &message.from, "").await;

        EmailRecord {
            id: 0,
            iu_score: classification.iu_score(),
            category: classification.category.as_str().to_string(),
            intent: classification.intent.as_str().to_string(),
            summary: classification.summary,
            message_id: message.id,
            from: message.from,
            to: message.to,
            subject: message.subject,
            body: message.body,
            date_sent,
            is_read: false,
            has_attachments: message.has_attachments,
            created_at: None,
        }
    }
}

const OFFSET_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M %z",
    "%d %b %Y %H:%M %z",
    "%Y-%m-%d %H:%M:%S %z",
    "%a %b %e %H:%M:%S %Y %z",
    "%a, %d %B %Y %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
];

/// Best-effort parse of a provider `Date` header.
///
/// Accepts RFC 2822 (with or without a trailing zone comment such as
/// `(UTC)`), RFC 3339 and a handful of common variants. Dates without an
/// offset are taken as UTC. Returns `None` rather than failing.
#[must_use]
pub fn parse_sent_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let cleaned = raw.find('(').map_or(raw, |i| raw[..i].trim_end());
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|f| DateTime::parse_from_str(cleaned, f).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(cleaned, f).ok())
        .map(|dt| dt.and_utc())
}
