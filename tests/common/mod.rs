//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use inbox_sync::{
    ClassificationGateway, ClassifyError, Classifier, EmailRecord, InboundMessage, MailSource,
    RawClassification, RecordStore, SourceError, SqliteStore, SyncPipeline, SyncSettings,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub fn message(id: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        from: format!("sender-{id}@example.com"),
        to: "me@example.com".to_string(),
        subject: format!("Subject {id}"),
        body: format!("Body of {id}"),
        date: "Mon, 3 Feb 2025 10:00:00 +0000".to_string(),
        has_attachments: false,
        labels: ["INBOX".to_string(), "UNREAD".to_string()].into(),
    }
}

pub fn messages(ids: &[&str]) -> Vec<InboundMessage> {
    ids.iter().map(|id| message(id)).collect()
}

pub fn work_invoice() -> RawClassification {
    RawClassification {
        category: "Work".to_string(),
        importance_score: 4,
        urgency_score: 5,
        summary: "Vendor asks for payment of an invoice.".to_string(),
        intent: "Invoice".to_string(),
    }
}

/// Mail source returning a fixed batch, or failing.
pub struct FakeSource {
    messages: Mutex<Vec<InboundMessage>>,
    error: Option<SourceError>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(messages: Vec<InboundMessage>) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(messages),
            error: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: SourceError) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            error: Some(error),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_messages(&self, messages: Vec<InboundMessage>) {
        *self.messages.lock().unwrap() = messages;
    }
}

#[async_trait]
impl MailSource for FakeSource {
    async fn fetch_new(
        &self,
        _query: &str,
        max_results: usize,
    ) -> Result<Vec<InboundMessage>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        let messages = self.messages.lock().unwrap();
        Ok(messages.iter().take(max_results).cloned().collect())
    }

    async fn mark_read(&self, _message_id: &str) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Classifier with a canned answer and an optional gate that holds every
/// call until permits are added.
pub struct StubClassifier {
    answer: Result<RawClassification, ClassifyError>,
    gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
}

impl StubClassifier {
    pub fn answering(raw: RawClassification) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(raw),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: ClassifyError) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(error),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers only once the returned semaphore receives permits.
    pub fn gated(raw: RawClassification) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let classifier = Arc::new(Self {
            answer: Ok(raw),
            gate: Some(Arc::clone(&gate)),
            calls: AtomicUsize::new(0),
        });
        (classifier, gate)
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(
        &self,
        _body: &str,
        _sender: &str,
        _context: &str,
    ) -> Result<RawClassification, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.answer.clone()
    }
}

/// Store that lets a "concurrent writer" insert one message id between
/// deduplication and commit.
pub struct RacingStore {
    pub inner: SqliteStore,
    pub conflicting_id: String,
}

impl RecordStore for RacingStore {
    fn exists(&self, message_id: &str) -> inbox_sync::Result<bool> {
        self.inner.exists(message_id)
    }

    fn insert_batch(&self, records: &[EmailRecord]) -> inbox_sync::Result<usize> {
        let mut rival = records
            .iter()
            .find(|r| r.message_id == self.conflicting_id)
            .cloned()
            .expect("conflicting id is part of the batch");
        rival.subject = "written concurrently".to_string();
        self.inner.insert_batch(&[rival])?;
        self.inner.insert_batch(records)
    }

    fn get_by_message_id(&self, message_id: &str) -> inbox_sync::Result<Option<EmailRecord>> {
        self.inner.get_by_message_id(message_id)
    }

    fn query(&self, query: &inbox_sync::EmailQuery) -> inbox_sync::Result<Vec<EmailRecord>> {
        self.inner.query(query)
    }

    fn mark_read(&self, message_ids: &[String]) -> inbox_sync::Result<usize> {
        self.inner.mark_read(message_ids)
    }

    fn count(&self) -> inbox_sync::Result<usize> {
        self.inner.count()
    }
}

pub fn pipeline(
    source: Arc<dyn MailSource>,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn RecordStore>,
) -> SyncPipeline {
    SyncPipeline::new(
        source,
        ClassificationGateway::new(classifier),
        store,
        SyncSettings::default(),
    )
}

pub fn sqlite() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

/// Store whose commits take a while, to observe runs mid-transaction.
pub struct SlowStore {
    pub inner: SqliteStore,
    pub commit_delay: std::time::Duration,
}

impl RecordStore for SlowStore {
    fn exists(&self, message_id: &str) -> inbox_sync::Result<bool> {
        self.inner.exists(message_id)
    }

    fn insert_batch(&self, records: &[EmailRecord]) -> inbox_sync::Result<usize> {
        std::thread::sleep(self.commit_delay);
        self.inner.insert_batch(records)
    }

    fn get_by_message_id(&self, message_id: &str) -> inbox_sync::Result<Option<EmailRecord>> {
        self.inner.get_by_message_id(message_id)
    }

    fn query(&self, query: &inbox_sync::EmailQuery) -> inbox_sync::Result<Vec<EmailRecord>> {
        self.inner.query(query)
    }

    fn mark_read(&self, message_ids: &[String]) -> inbox_sync::Result<usize> {
        self.inner.mark_read(message_ids)
    }

    fn count(&self) -> inbox_sync::Result<usize> {
        self.inner.count()
    }
}
