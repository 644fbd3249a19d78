use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::types::Scope;

use super::{MetricKey, MetricMutation, MetricRow, MetricsStore};

/// Counters held in a sharded map. The entry guard makes each upsert atomic per key.
#[derive(Default)]
pub struct InMemoryMetricsStore {
    rows: DashMap<MetricKey, MetricRow>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn upsert_daily(&self, key: &MetricKey, mutation: MetricMutation) -> Result<MetricRow, StoreError> {
        let mut row = self
            .rows
            .entry(key.clone())
            .or_insert_with(|| MetricRow::empty(key));
        row.apply(&mutation.delta());
        Ok(row.clone())
    }

    async fn history(&self, scope: &Scope, since: Option<NaiveDate>) -> Result<Vec<MetricRow>, StoreError> {
        let mut rows: Vec<MetricRow> = self
            .rows
            .iter()
            .filter(|r| r.key().tenant_id == scope.tenant_id)
            .filter(|r| scope.agent_id.is_none() || r.key().agent_id == scope.agent_id)
            .filter(|r| since.map_or(true, |s| r.key().date >= s))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.agent_id.cmp(&b.agent_id)));
        Ok(rows)
    }

    async fn total_messages_between(&self, tenant_id: &str, from: NaiveDate, to: NaiveDate) -> Result<u64, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.key().tenant_id == tenant_id && r.key().date >= from && r.key().date <= to)
            .map(|r| r.value().total_messages)
            .sum())
    }
}
