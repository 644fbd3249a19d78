//! Daily per-tenant, per-agent conversation counters.

pub mod memory_store;

#[cfg(feature = "postgres-backend")]
pub mod pg_store;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::sentiment::SentimentLabel;
use crate::types::Scope;

pub use memory_store::InMemoryMetricsStore;

/// Identity of one aggregation bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub date: NaiveDate,
}

impl MetricKey {
    pub fn new(scope: &Scope, date: NaiveDate) -> Self {
        Self {
            tenant_id: scope.tenant_id.clone(),
            agent_id: scope.agent_id.clone(),
            date,
        }
    }
}

/// One day of counters for a tenant/agent pair.
///
/// `avg_response_time_ms` and `satisfaction_score` hold the latest grounded
/// assistant turn of the day, not a running average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    #[serde(rename = "user_id")]
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub date: NaiveDate,
    pub total_messages: u64,
    pub user_messages: u64,
    pub bot_messages: u64,
    pub positive_count: u64,
    pub neutral_count: u64,
    pub negative_count: u64,
    pub avg_response_time_ms: Option<u64>,
    pub satisfaction_score: Option<f64>,
}

impl MetricRow {
    pub fn empty(key: &MetricKey) -> Self {
        Self {
            tenant_id: key.tenant_id.clone(),
            agent_id: key.agent_id.clone(),
            date: key.date,
            total_messages: 0,
            user_messages: 0,
            bot_messages: 0,
            positive_count: 0,
            neutral_count: 0,
            negative_count: 0,
            avg_response_time_ms: None,
            satisfaction_score: None,
        }
    }

    pub fn apply(&mut self, delta: &MetricDelta) {
        self.total_messages += delta.total;
        self.user_messages += delta.user;
        self.bot_messages += delta.bot;
        self.positive_count += delta.positive;
        self.neutral_count += delta.neutral;
        self.negative_count += delta.negative;
        if delta.latency_ms.is_some() {
            self.avg_response_time_ms = delta.latency_ms;
        }
        if delta.satisfaction.is_some() {
            self.satisfaction_score = delta.satisfaction;
        }
    }
}

/// A single turn's effect on its day's row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricMutation {
    RecordUserTurn(SentimentLabel),
    RecordAssistantTurn {
        latency_ms: Option<u64>,
        satisfaction: Option<f64>,
    },
}

/// Column increments and overwrites derived from a [`MetricMutation`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricDelta {
    pub total: u64,
    pub user: u64,
    pub bot: u64,
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
    pub latency_ms: Option<u64>,
    pub satisfaction: Option<f64>,
}

impl MetricMutation {
    pub fn delta(&self) -> MetricDelta {
        match *self {
            MetricMutation::RecordUserTurn(label) => MetricDelta {
                total: 1,
                user: 1,
                positive: u64::from(label == SentimentLabel::Positive),
                neutral: u64::from(label == SentimentLabel::Neutral),
                negative: u64::from(label == SentimentLabel::Negative),
                ..Default::default()
            },
            MetricMutation::RecordAssistantTurn { latency_ms, satisfaction } => MetricDelta {
                total: 1,
                bot: 1,
                latency_ms,
                satisfaction,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Atomically create-or-update the row for `key`. Counters add up,
    /// scalars are last-write-wins. Safe under concurrent calls for one key.
    async fn upsert_daily(&self, key: &MetricKey, mutation: MetricMutation) -> Result<MetricRow, StoreError>;

    /// Rows in `scope` dated on or after `since`, ascending by date.
    /// A scope without an agent returns rows for every agent of the tenant.
    async fn history(&self, scope: &Scope, since: Option<NaiveDate>) -> Result<Vec<MetricRow>, StoreError>;

    /// Sum of `total_messages` across all of a tenant's rows in `[from, to]`.
    async fn total_messages_between(&self, tenant_id: &str, from: NaiveDate, to: NaiveDate) -> Result<u64, StoreError>;
}
