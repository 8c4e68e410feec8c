//! Classification gateway.
//!
//! Wraps an external [`Classifier`] and guarantees a fully populated
//! [`ClassificationResult`] for every message: backend failures are turned
//! into a fixed fallback and out-of-range scores are clamped.

use crate::error::ClassifyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Work,
    Personal,
    Promotional,
    Spam,
    Urgent,
    Uncategorized,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Work => "Work",
            Self::Personal => "Personal",
            Self::Promotional => "Promotional",
            Self::Spam => "Spam",
            Self::Urgent => "Urgent",
            Self::Uncategorized => "Uncategorized",
        }
    }

    /// Parse a model label. Unknown labels become `Uncategorized`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match squash(label).as_str() {
            "work" => Self::Work,
            "personal" => Self::Personal,
            "promotional" | "promotion" | "marketing" => Self::Promotional,
            "spam" => Self::Spam,
            "urgent" => Self::Urgent,
            _ => Self::Uncategorized,
        }
    }
}

/// Primary intent of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    Invoice,
    Meeting,
    #[serde(rename = "FYI")]
    Fyi,
    ActionRequired,
    Unknown,
}

impl Intent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invoice => "Invoice",
            Self::Meeting => "Meeting",
            Self::Fyi => "FYI",
            Self::ActionRequired => "ActionRequired",
            Self::Unknown => "Unknown",
        }
    }

    /// Parse a model label. Unknown labels become `Unknown`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match squash(label).as_str() {
            "invoice" | "bill" => Self::Invoice,
            "meeting" => Self::Meeting,
            "fyi" => Self::Fyi,
            "actionrequired" => Self::ActionRequired,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase and drop separators so "Action Required" == "action_required".
fn squash(label: &str) -> String {
    label
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Unvalidated output of a classification backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawClassification {
    pub category: String,
    pub importance_score: i64,
    pub urgency_score: i64,
    pub summary: String,
    pub intent: String,
}

/// Normalized classification of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub importance_score: u8,
    pub urgency_score: u8,
    pub summary: String,
    pub intent: Intent,
}

impl ClassificationResult {
    /// The result used whenever the backend fails.
    #[must_use]
    pub fn fallback(reason: &str) -> Self {
        Self {
            category: Category::Uncategorized,
            importance_score: MIN_SCORE,
            urgency_score: MIN_SCORE,
            summary: format!("Error in AI processing: {reason}"),
            intent: Intent::Unknown,
        }
    }

    /// Clamp scores and map free-form labels onto the known sets.
    #[must_use]
    pub fn from_raw(raw: RawClassification) -> Self {
        Self {
            category: Category::from_label(&raw.category),
            importance_score: clamp_score(raw.importance_score),
            urgency_score: clamp_score(raw.urgency_score),
            summary: match raw.summary.trim() {
                "" => "No summary available".to_string(),
                s => s.to_string(),
            },
            intent: Intent::from_label(&raw.intent),
        }
    }

    /// Combined importance/urgency score, rounded half up. Always 1..=5.
    #[must_use]
    pub const fn iu_score(&self) -> u8 {
        (self.importance_score + self.urgency_score + 1) / 2
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_score(score: i64) -> u8 {
    score.clamp(i64::from(MIN_SCORE), i64::from(MAX_SCORE)) as u8
}

/// An external inference backend.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        body: &str,
        sender: &str,
        context: &str,
    ) -> Result<RawClassification, ClassifyError>;
}

/// Fail-safe front for a [`Classifier`].
#[derive(Clone)]
pub struct ClassificationGateway {
    backend: Arc<dyn Classifier>,
}

impl ClassificationGateway {
    #[must_use]
    pub fn new(backend: Arc<dyn Classifier>) -> Self {
        Self { backend }
    }

    /// Classify a message. Never fails; see [`ClassificationResult::fallback`].
    pub async fn classify(&self, body: &str, sender: &str, context: &str) -> ClassificationResult {
        match self.backend.classify(body, sender, context).await {
            Ok(raw) => {
                let result = ClassificationResult::from_raw(raw);
                debug!(
                    category = %result.category,
                    intent = %result.intent,
                    importance = result.importance_score,
                    urgency = result.urgency_score,
                    "Classified message from {sender}"
                );
                result
            }
            Err(e) => {
                warn!("Classification failed for message from {sender}, using fallback: {e}");
                ClassificationResult::fallback(&e.to_string())
            }
        }
    }
}
