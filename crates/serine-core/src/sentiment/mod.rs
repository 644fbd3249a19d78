//! Keyword sentiment classification and the log of sentiment reads.

pub mod memory_store;

#[cfg(feature = "postgres-backend")]
pub mod pg_store;

use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::Scope;

pub use memory_store::InMemorySentimentStore;

const POSITIVE_WORDS: &[&str] = &["great", "love", "amazing", "good", "thanks", "appreciate"];
const NEGATIVE_WORDS: &[&str] = &["hate", "bad", "terrible", "confused", "useless"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }

    /// Fixed score attached to each label.
    pub fn score(&self) -> f64 {
        match self {
            SentimentLabel::Positive => 0.9,
            SentimentLabel::Neutral => 0.5,
            SentimentLabel::Negative => 0.2,
        }
    }
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SentimentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(SentimentLabel::Positive),
            "neutral" => Ok(SentimentLabel::Neutral),
            "negative" => Ok(SentimentLabel::Negative),
            other => Err(format!("Unknown sentiment label: {other}")),
        }
    }
}

/// Classify `text` by case-insensitive keyword substring match.
///
/// Positive keywords are checked first, so mixed text is positive.
pub fn classify(text: &str) -> (SentimentLabel, f64) {
    let lower = text.to_lowercase();
    let label = if POSITIVE_WORDS.iter().any(|w| lower.contains(w)) {
        SentimentLabel::Positive
    } else if NEGATIVE_WORDS.iter().any(|w| lower.contains(w)) {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    };
    (label, label.score())
}

/// One logged emotional read on a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub id: String,
    #[serde(rename = "user_id")]
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub message: String,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SentimentStore: Send + Sync {
    async fn record(
        &self,
        scope: &Scope,
        message: &str,
        label: SentimentLabel,
        score: f64,
    ) -> Result<SentimentRecord, StoreError>;

    /// Records in `scope`, newest first, optionally restricted to `created_at` in `range`.
    ///
    /// A scope without an agent matches every agent of the tenant.
    async fn list(
        &self,
        scope: &Scope,
        range: Option<Range<DateTime<Utc>>>,
    ) -> Result<Vec<SentimentRecord>, StoreError>;
}
