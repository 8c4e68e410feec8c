//! Gemini-backed classifier.

use crate::classify::{Classifier, RawClassification};
use crate::error::ClassifyError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Public Generative Language API endpoint.
pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const PROMPT: &str = "You are the triage layer of an email assistant.
Analyze the following incoming email.

CONTEXT (recent emails from this sender):
{context}

INCOMING EMAIL:
From: {sender}
Content: {body}

INSTRUCTIONS:
1. Categorize the email as one of Work, Personal, Promotional, Spam, Urgent.
2. Rate importance and urgency from 1 (low) to 5 (high) using the sender history and content.
3. Summarize the email in one sentence.
4. Set intent to one of Invoice, Meeting, FYI, ActionRequired. Bills and invoices are Invoice.";

/// Configuration for the Gemini classifier.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    /// Longest body prefix sent to the model, in characters
    pub max_body_chars: usize,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: GEMINI_API_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            max_body_chars: 8000,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

/// Classifier calling Gemini's `generateContent` with a JSON response schema.
pub struct GeminiClassifier {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClassifier {
    pub fn new(config: GeminiConfig) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClassifyError::Network(format!("HTTP client error: {e}")))?;
        Ok(Self { client, config })
    }

    fn build_prompt(&self, body: &str, sender: &str, context: &str) -> String {
        let body: String = body.chars().take(self.config.max_body_chars).collect();
        PROMPT
            .replace("{context}", if context.is_empty() { "(none)" } else { context })
            .replace("{sender}", sender)
            .replace("{body}", &body)
    }

    fn request_body(prompt: &str) -> serde_json::Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0.1,
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "category": { "type": "STRING" },
                        "importance_score": { "type": "INTEGER" },
                        "urgency_score": { "type": "INTEGER" },
                        "summary": { "type": "STRING" },
                        "intent": { "type": "STRING" }
                    },
                    "required": ["category", "importance_score", "urgency_score", "summary", "intent"]
                }
            }
        })
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(
        &self,
        body: &str,
        sender: &str,
        context: &str,
    ) -> Result<RawClassification, ClassifyError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ClassifyError::MissingCredential)?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        debug!("Calling Gemini at {url}");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&Self::request_body(&self.build_prompt(body, sender, context)))
            .send()
            .await
            .map_err(|e| ClassifyError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ClassifyError::Status(status.as_u16(), text));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ClassifyError::Malformed(e.to_string()))?;

        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| ClassifyError::Malformed("response has no candidates".to_string()))?;

        serde_json::from_str(text).map_err(|e| ClassifyError::Malformed(e.to_string()))
    }
}
