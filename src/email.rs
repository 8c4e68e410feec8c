//! Message and record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A message as fetched from the mail source, before it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider-assigned message identifier, unique per mailbox.
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Raw `Date` header as sent by the provider. Not guaranteed to parse.
    pub date: String,
    pub has_attachments: bool,
    pub labels: BTreeSet<String>,
}

/// A persisted, classified message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Row id assigned by the store; zero until inserted.
    pub id: i64,
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub date_sent: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub category: String,
    pub iu_score: u8,
    pub intent: String,
    pub summary: String,
    /// Assigned by the store at insert time.
    pub created_at: Option<DateTime<Utc>>,
}

/// A node of a MIME body tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePart {
    Text(String),
    Html(String),
    Multipart(Vec<MimePart>),
    Attachment { filename: String },
    Other,
}

impl MimePart {
    /// Extract a readable body, preferring plain text over HTML.
    ///
    /// Direct children are searched for `text/plain` first, then `text/html`
    /// (with tags stripped); nested multiparts are only visited when neither
    /// is found at this level.
    #[must_use]
    pub fn extract_body(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Html(html) => strip_html(html),
            Self::Attachment { .. } | Self::Other => String::new(),
            Self::Multipart(parts) => {
                if let Some(text) = parts.iter().find_map(|p| match p {
                    Self::Text(t) if !t.is_empty() => Some(t.clone()),
                    _ => None,
                }) {
                    return text;
                }
                if let Some(html) = parts.iter().find_map(|p| match p {
                    Self::Html(h) if !h.is_empty() => Some(strip_html(h)),
                    _ => None,
                }) {
                    return html;
                }
                parts
                    .iter()
                    .filter(|p| matches!(p, Self::Multipart(_)))
                    .map(Self::extract_body)
                    .find(|body| !body.is_empty())
                    .unwrap_or_default()
            }
        }
    }

    /// Whether any part of the tree is a named attachment.
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        match self {
            Self::Attachment { filename } => !filename.is_empty(),
            Self::Multipart(parts) => parts.iter().any(Self::has_attachments),
            _ => false,
        }
    }
}

/// Render HTML as plain text with whitespace collapsed to single spaces.
///
/// Entities are decoded and stray `<` characters are kept as text. Input the
/// renderer rejects is returned with only its whitespace collapsed.
#[must_use]
pub fn strip_html(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 80).unwrap_or_else(|_| html.to_string());
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
