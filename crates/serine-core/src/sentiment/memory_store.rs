use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::Scope;
use crate::util::{Clock, SystemClock};

use super::{SentimentLabel, SentimentRecord, SentimentStore};

pub struct InMemorySentimentStore {
    records: RwLock<Vec<SentimentRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySentimentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            clock,
        }
    }
}

impl Default for InMemorySentimentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn in_scope(record: &SentimentRecord, scope: &Scope) -> bool {
    record.tenant_id == scope.tenant_id
        && (scope.agent_id.is_none() || record.agent_id == scope.agent_id)
}

#[async_trait]
impl SentimentStore for InMemorySentimentStore {
    async fn record(
        &self,
        scope: &Scope,
        message: &str,
        label: SentimentLabel,
        score: f64,
    ) -> Result<SentimentRecord, StoreError> {
        let record = SentimentRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: scope.tenant_id.clone(),
            agent_id: scope.agent_id.clone(),
            message: message.to_string(),
            sentiment_score: score,
            sentiment_label: label,
            created_at: self.clock.now(),
        };
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn list(
        &self,
        scope: &Scope,
        range: Option<Range<DateTime<Utc>>>,
    ) -> Result<Vec<SentimentRecord>, StoreError> {
        let records = self.records.read().await;
        // Appended in time order; reverse for newest first
        Ok(records
            .iter()
            .rev()
            .filter(|r| in_scope(r, scope))
            .filter(|r| range.as_ref().map_or(true, |rg| rg.contains(&r.created_at)))
            .cloned()
            .collect())
    }
}
