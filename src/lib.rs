//! Mailbox sync service: polls a mail source, classifies new messages and
//! stores them, exposing the results over HTTP.

mod classify;
mod dedup;
mod email;
mod error;
mod gemini;
mod gmail;
mod http;
mod scheduler;
mod source;
mod sqlite_store;
mod store;
mod sync;

pub use classify::{
    Category, ClassificationGateway, ClassificationResult, Classifier, Intent, RawClassification,
};
pub use dedup::{partition, DedupOutcome};
pub use email::{strip_html, EmailRecord, InboundMessage, MimePart};
pub use error::{ClassifyError, Error, Result, SourceError};
pub use gemini::{GeminiClassifier, GeminiConfig};
pub use gmail::{GmailConfig, GmailSource, DEFAULT_SEARCH_MAX};
pub use http::router;
pub use scheduler::{FlightPermit, Scheduler, SingleFlight, TriggerOutcome, DEFAULT_INTERVAL};
pub use source::{MailSource, DEFAULT_QUERY};
pub use sqlite_store::SqliteStore;
pub use store::{EmailQuery, MemoryStore, RecordStore, SortOrder};
pub use sync::{parse_sent_date, SyncPipeline, SyncSettings, SyncState, SyncStatus, SyncSummary};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Configuration options for the sync service.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    /// HTTP API port (default 8001)
    pub http_port: Option<u16>,
    /// `SQLite` database file; `None` keeps records in memory
    pub db_path: Option<PathBuf>,
    /// Period between scheduled runs (default 5 minutes)
    pub interval: Option<Duration>,
    /// Run once immediately at startup
    pub sync_on_start: bool,
    /// Provider search query (default `is:unread`)
    pub query: Option<String>,
    /// Messages fetched per run (default 10)
    pub max_results: Option<usize>,
    /// Concurrent classification calls per run (default 1)
    pub classify_concurrency: Option<usize>,
    pub gmail: GmailConfig,
    pub gemini: GeminiConfig,
}

/// Explicitly constructed collaborators of the pipeline.
pub struct ServiceParts {
    pub source: Arc<dyn MailSource>,
    pub classifier: Arc<dyn Classifier>,
    pub store: Arc<dyn RecordStore>,
}

impl ServiceParts {
    /// Build the Gmail source, Gemini classifier and configured store.
    pub fn from_options(opts: &ServiceOptions) -> Result<Self> {
        let source = GmailSource::new(opts.gmail.clone())?;
        let classifier = GeminiClassifier::new(opts.gemini.clone())
            .map_err(|e| Error::Config(e.to_string()))?;
        let store: Arc<dyn RecordStore> = match &opts.db_path {
            Some(path) => {
                tracing::info!("Using SQLite database at {}", path.display());
                Arc::new(SqliteStore::open(path)?)
            }
            None => {
                tracing::warn!("No database path configured, records are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self {
            source: Arc::new(source),
            classifier: Arc::new(classifier),
            store,
        })
    }
}

/// Running service handles.
pub struct RunningService {
    pub http_addr: SocketAddr,
    scheduler: Arc<Scheduler>,
    store: Arc<dyn RecordStore>,
    scheduler_handle: tokio::task::JoinHandle<()>,
    http_handle: tokio::task::JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RunningService {
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Stop the scheduler and HTTP server, then flush the store.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.scheduler_handle.await;
        let _ = self.http_handle.await;
        self.store.close();
    }
}

/// Start the service with the Gmail and Gemini backends.
pub async fn start_service(opts: ServiceOptions) -> Result<RunningService> {
    let parts = ServiceParts::from_options(&opts)?;
    start_with(opts, parts).await
}

/// Start the service with caller-supplied collaborators.
pub async fn start_with(opts: ServiceOptions, parts: ServiceParts) -> Result<RunningService> {
    let http_port = opts.http_port.unwrap_or(8001);
    let interval = opts.interval.unwrap_or(DEFAULT_INTERVAL);
    if interval.is_zero() {
        return Err(Error::Config("sync interval must be greater than zero".to_string()));
    }

    let defaults = SyncSettings::default();
    let settings = SyncSettings {
        query: opts.query.unwrap_or(defaults.query),
        max_results: opts.max_results.unwrap_or(defaults.max_results),
        classify_concurrency: opts
            .classify_concurrency
            .unwrap_or(defaults.classify_concurrency),
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pipeline = Arc::new(SyncPipeline::new(
        parts.source,
        ClassificationGateway::new(parts.classifier),
        Arc::clone(&parts.store),
        settings,
    ));
    let scheduler =
        Arc::new(Scheduler::new(pipeline, interval).with_run_on_start(opts.sync_on_start));

    let http_listener = TcpListener::bind(("0.0.0.0", http_port)).await?;
    let http_addr = http_listener.local_addr()?;
    tracing::info!(
        "HTTP API listening on port {}, emails at /api/email",
        http_addr.port()
    );

    let sched = Arc::clone(&scheduler);
    let sched_shutdown = shutdown_tx.subscribe();
    let scheduler_handle = tokio::spawn(async move {
        sched.run(sched_shutdown).await;
    });

    let http_store = Arc::clone(&parts.store);
    let http_scheduler = Arc::clone(&scheduler);
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        http::run_http_server(http_listener, http_store, http_scheduler, http_shutdown).await;
    });

    Ok(RunningService {
        http_addr,
        scheduler,
        store: parts.store,
        scheduler_handle,
        http_handle,
        shutdown_tx,
    })
}
