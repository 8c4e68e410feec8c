//! HTTP API over the record store and the sync scheduler.

use crate::email::EmailRecord;
use crate::error::Error;
use crate::scheduler::{Scheduler, TriggerOutcome};
use crate::store::{EmailQuery, RecordStore, SortOrder};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;
const IMPORTANT_MIN_SCORE: u8 = 3;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn RecordStore>,
    scheduler: Arc<Scheduler>,
}

#[derive(Debug, Deserialize, Default)]
struct ListParams {
    limit: Option<usize>,
    min_score: Option<u8>,
}

impl ListParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Wire shape of a stored email.
#[derive(Debug, Serialize)]
struct EmailResponse {
    id: i64,
    message_id: String,
    from: String,
    to: String,
    subject: String,
    body: String,
    date: Option<String>,
    has_attachments: bool,
    is_read: bool,
    labels: Vec<String>,
    importance: u8,
    intent: String,
    summary: String,
}

impl From<EmailRecord> for EmailResponse {
    fn from(r: EmailRecord) -> Self {
        Self {
            id: r.id,
            labels: r
                .category
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            date: r.date_sent.map(|d| d.to_rfc3339()),
            message_id: r.message_id,
            from: r.from,
            to: r.to,
            subject: r.subject,
            body: r.body,
            has_attachments: r.has_attachments,
            is_read: r.is_read,
            importance: r.iu_score,
            intent: r.intent,
            summary: r.summary,
        }
    }
}

fn to_response(records: Vec<EmailRecord>) -> Json<Vec<EmailResponse>> {
    Json(records.into_iter().map(EmailResponse::from).collect())
}

fn internal_error(context: &str, e: &Error) -> Response {
    tracing::error!("{context}: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": context })),
    )
        .into_response()
}

/// Build the API router.
pub fn router(store: Arc<dyn RecordStore>, scheduler: Arc<Scheduler>) -> Router {
    let state = AppState { store, scheduler };

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/sync", post(sync_now))
        .route("/unread", get(get_unread))
        .route("/all", get(get_all))
        .route("/important", get(get_important))
        .route("/emails/{message_id}", get(get_email));

    Router::new()
        .nest("/api/email", api)
        .fallback(not_found)
        .with_state(state)
}

/// Serve the API until shutdown.
pub async fn run_http_server(
    listener: TcpListener,
    store: Arc<dyn RecordStore>,
    scheduler: Arc<Scheduler>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let app = router(store, scheduler);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
    {
        tracing::error!("HTTP server error: {e}");
    }
}

async fn health_check(State(state): State<AppState>) -> Response {
    match state.store.count() {
        Ok(email_count) => Json(json!({
            "status": "healthy",
            "email_count": email_count,
            "sync_state": state.scheduler.pipeline().state(),
            "skipped_runs": state.scheduler.skipped_runs(),
        }))
        .into_response(),
        Err(e) => internal_error("Failed to read store", &e),
    }
}

async fn sync_now(State(state): State<AppState>) -> Response {
    match state.scheduler.trigger().await {
        TriggerOutcome::Completed(summary) if summary.is_ok() => Json(summary).into_response(),
        TriggerOutcome::Completed(summary) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(summary)).into_response()
        }
        TriggerOutcome::Skipped => (
            StatusCode::CONFLICT,
            Json(json!({ "status": "skipped", "detail": "sync already in progress" })),
        )
            .into_response(),
    }
}

/// Unread emails; returning them marks them read.
async fn get_unread(State(state): State<AppState>) -> Response {
    let query = EmailQuery {
        unread_only: true,
        ..Default::default()
    };
    let records = match state.store.query(&query) {
        Ok(records) => records,
        Err(e) => return internal_error("Failed to fetch unread emails", &e),
    };

    let ids: Vec<String> = records.iter().map(|r| r.message_id.clone()).collect();
    if let Err(e) = state.store.mark_read(&ids) {
        return internal_error("Failed to fetch unread emails", &e);
    }
    to_response(records).into_response()
}

async fn get_all(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let query = EmailQuery {
        limit: Some(params.limit()),
        ..Default::default()
    };
    match state.store.query(&query) {
        Ok(records) => to_response(records).into_response(),
        Err(e) => internal_error("Failed to fetch all emails", &e),
    }
}

async fn get_important(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let query = EmailQuery {
        min_score: Some(params.min_score.unwrap_or(IMPORTANT_MIN_SCORE)),
        order: SortOrder::Score,
        limit: Some(params.limit()),
        ..Default::default()
    };
    match state.store.query(&query) {
        Ok(records) => to_response(records).into_response(),
        Err(e) => internal_error("Failed to fetch important emails", &e),
    }
}

async fn get_email(State(state): State<AppState>, Path(message_id): Path<String>) -> Response {
    match state.store.get_by_message_id(&message_id) {
        Ok(Some(record)) => Json(EmailResponse::from(record)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Email not found").into_response(),
        Err(e) => internal_error("Failed to fetch email", &e),
    }
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
