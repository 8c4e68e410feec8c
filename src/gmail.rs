//! Gmail REST API mail source.

use crate::email::{InboundMessage, MimePart};
use crate::error::SourceError;
use crate::source::MailSource;
use async_trait::async_trait;
use base64::prelude::*;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Public Gmail API endpoint.
pub const GMAIL_API_URL: &str = "https://gmail.googleapis.com";

/// Result cap for ad-hoc [`GmailSource::search`] calls.
pub const DEFAULT_SEARCH_MAX: usize = 100;

/// Configuration for the Gmail source.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// API base URL, without the `/gmail/v1` suffix
    pub base_url: String,
    /// OAuth access token. Obtaining and refreshing it is the host's job.
    pub access_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            base_url: GMAIL_API_URL.to_string(),
            access_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    payload: Payload,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Deserialize, Default)]
struct PartBody {
    data: Option<String>,
}

impl Payload {
    fn header(&self, name: &str) -> String {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.clone())
            .unwrap_or_default()
    }

    fn to_mime(&self) -> MimePart {
        if !self.filename.is_empty() {
            return MimePart::Attachment {
                filename: self.filename.clone(),
            };
        }
        match self.mime_type.as_str() {
            "text/plain" => MimePart::Text(decode_body(self.body.data.as_deref())),
            "text/html" => MimePart::Html(decode_body(self.body.data.as_deref())),
            _ if !self.parts.is_empty() => {
                MimePart::Multipart(self.parts.iter().map(Self::to_mime).collect())
            }
            _ => MimePart::Other,
        }
    }
}

/// Decode a base64url body, tolerating missing padding.
fn decode_body(data: Option<&str>) -> String {
    let Some(data) = data else {
        return String::new();
    };
    BASE64_URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Mail source backed by the Gmail REST API.
pub struct GmailSource {
    client: Client,
    config: GmailConfig,
}

impl GmailSource {
    /// Build a source with its own HTTP client.
    pub fn new(config: GmailConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceError::Network(format!("HTTP client error: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/gmail/v1/users/me/{path}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn authorized(&self, req: RequestBuilder) -> Result<RequestBuilder, SourceError> {
        let token = self
            .config
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SourceError::Auth("no access token configured".to_string()))?;
        Ok(req.bearer_auth(token))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, SourceError> {
        let resp = self
            .authorized(req)?
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SourceError::Auth(format!("provider returned {}", resp.status())))
            }
            s => {
                let text = resp.text().await.unwrap_or_default();
                Err(SourceError::Status(s.as_u16(), text))
            }
        }
    }

    async fn get_message(&self, id: &str) -> Result<InboundMessage, SourceError> {
        let req = self
            .client
            .get(self.url(&format!("messages/{id}")))
            .query(&[("format", "full")]);
        let message: GmailMessage = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let mime = message.payload.to_mime();
        Ok(InboundMessage {
            id: message.id,
            from: message.payload.header("From"),
            to: message.payload.header("To"),
            subject: message.payload.header("Subject"),
            date: message.payload.header("Date"),
            body: mime.extract_body(),
            has_attachments: mime.has_attachments(),
            labels: message.label_ids.into_iter().collect(),
        })
    }

    /// Search the mailbox with any Gmail query, returning up to
    /// [`DEFAULT_SEARCH_MAX`] matches.
    pub async fn search(&self, query: &str) -> Result<Vec<InboundMessage>, SourceError> {
        self.list_and_fetch(query, DEFAULT_SEARCH_MAX).await
    }

    /// List messages matching `query` and fetch each one in full.
    ///
    /// Messages whose details cannot be loaded are logged and left out.
    async fn list_and_fetch(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<InboundMessage>, SourceError> {
        let max = max_results.to_string();
        let req = self
            .client
            .get(self.url("messages"))
            .query(&[("q", query), ("maxResults", max.as_str())]);
        let list: ListResponse = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        if list.messages.is_empty() {
            debug!("No messages matched '{query}'");
            return Ok(Vec::new());
        }

        let mut messages = Vec::with_capacity(list.messages.len());
        for entry in list.messages {
            match self.get_message(&entry.id).await {
                Ok(message) => messages.push(message),
                Err(e) => warn!(message_id = %entry.id, "Failed to load message details: {e}"),
            }
        }
        info!("Search '{query}' returned {} messages", messages.len());
        Ok(messages)
    }
}

#[async_trait]
impl MailSource for GmailSource {
    async fn fetch_new(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<InboundMessage>, SourceError> {
        self.list_and_fetch(query, max_results).await
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), SourceError> {
        let req = self
            .client
            .post(self.url(&format!("messages/{message_id}/modify")))
            .json(&json!({ "removeLabelIds": ["UNREAD"] }));
        self.send(req).await?;
        debug!("Marked message {message_id} as read");
        Ok(())
    }
}
