use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::Scope;
use crate::util::{Clock, SystemClock};

use super::scoring::{rank, Scorer, TrigramScorer};
use super::{KnowledgeEntry, KnowledgeStore, ScoredEntry};

/// Process-local knowledge table. Entries are kept in insertion order.
pub struct InMemoryKnowledgeStore {
    entries: RwLock<Vec<KnowledgeEntry>>,
    scorer: Box<dyn Scorer>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::with_scorer(Box::new(TrigramScorer))
    }

    pub fn with_scorer(scorer: Box<dyn Scorer>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            scorer,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn insert(&self, scope: &Scope, question: &str, answer: &str) -> Result<KnowledgeEntry, StoreError> {
        let entry = KnowledgeEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: scope.tenant_id.clone(),
            agent_id: scope.agent_id.clone(),
            question: question.trim().to_string(),
            answer: answer.trim().to_string(),
            created_at: self.clock.now(),
        };
        self.entries.write().await.push(entry.clone());
        debug!("Stored knowledge {} for {}", entry.id, scope);
        Ok(entry)
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| e.tenant_id == tenant_id).cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }

    async fn count(&self, scope: &Scope) -> Result<usize, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| e.visible_to(scope)).count())
    }

    async fn search(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<ScoredEntry>, StoreError> {
        let candidates: Vec<KnowledgeEntry> = {
            let entries = self.entries.read().await;
            entries.iter().filter(|e| e.visible_to(scope)).cloned().collect()
        };
        Ok(rank(query, candidates, limit, self.scorer.as_ref()))
    }
}
