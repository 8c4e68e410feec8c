//! CLI entry point for inbox-sync.

use clap::Parser;
use inbox_sync::{start_service, GeminiConfig, GmailConfig, ServiceOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inbox-sync")]
#[command(about = "Poll a Gmail mailbox, classify new mail with Gemini and store it in SQLite")]
struct Cli {
    /// HTTP port to listen on
    #[arg(short = 'p', long, env = "INBOX_SYNC_PORT", default_value = "8001")]
    http_port: u16,

    /// SQLite database file (in-memory store when omitted)
    #[arg(short = 'd', long, env = "INBOX_SYNC_DB")]
    db: Option<PathBuf>,

    /// Seconds between sync runs
    #[arg(short = 'i', long, env = "INBOX_SYNC_INTERVAL", default_value = "300")]
    interval: u64,

    /// Run a sync immediately at startup
    #[arg(long)]
    sync_on_start: bool,

    /// Gmail search query selecting candidate messages
    #[arg(short = 'q', long, env = "INBOX_SYNC_QUERY", default_value = "is:unread")]
    query: String,

    /// Maximum messages fetched per run
    #[arg(short = 'm', long, env = "INBOX_SYNC_MAX_RESULTS", default_value = "10")]
    max_results: usize,

    /// Messages classified concurrently within a run
    #[arg(long, env = "INBOX_SYNC_CLASSIFY_CONCURRENCY", default_value = "1")]
    classify_concurrency: usize,

    /// OAuth access token for the Gmail API
    #[arg(long, env = "GMAIL_ACCESS_TOKEN", hide_env_values = true)]
    gmail_token: Option<String>,

    /// Gmail API base URL
    #[arg(long, env = "GMAIL_API_URL", default_value = "https://gmail.googleapis.com")]
    gmail_url: String,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.0-flash")]
    gemini_model: String,

    /// Gemini API base URL
    #[arg(
        long,
        env = "GEMINI_API_URL",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    gemini_url: String,

    /// Timeout in seconds for each Gmail and Gemini request
    #[arg(long, env = "INBOX_SYNC_HTTP_TIMEOUT", default_value = "30")]
    request_timeout: u64,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.gmail_token.is_none() {
        tracing::warn!("GMAIL_ACCESS_TOKEN not set, every sync run will fail to fetch");
    }
    if cli.gemini_key.is_none() {
        tracing::warn!("GEMINI_API_KEY not set, messages will be stored with fallback classification");
    }

    let timeout = Duration::from_secs(cli.request_timeout);
    let opts = ServiceOptions {
        http_port: Some(cli.http_port),
        db_path: cli.db,
        interval: Some(Duration::from_secs(cli.interval)),
        sync_on_start: cli.sync_on_start,
        query: Some(cli.query),
        max_results: Some(cli.max_results),
        classify_concurrency: Some(cli.classify_concurrency),
        gmail: GmailConfig {
            base_url: cli.gmail_url,
            access_token: cli.gmail_token,
            timeout,
        },
        gemini: GeminiConfig {
            base_url: cli.gemini_url,
            api_key: cli.gemini_key,
            model: cli.gemini_model,
            timeout,
            ..GeminiConfig::default()
        },
    };

    let service = start_service(opts).await?;

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    service.stop().await;

    Ok(())
}
