//! Per-tenant question/answer knowledge and similarity search over it.

pub mod memory_store;
pub mod scoring;

#[cfg(feature = "postgres-backend")]
pub mod pg_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, StoreError};
use crate::types::Scope;

pub use memory_store::InMemoryKnowledgeStore;
pub use scoring::{rank, scorer_for, Scorer, TrigramScorer, WordOverlapScorer};

/// A trainable fact owned by one tenant, optionally pinned to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    #[serde(rename = "user_id")]
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Whether a query in `scope` may see this entry.
    ///
    /// Tenant-wide entries (no agent) are visible to every agent of the tenant;
    /// a tenant-wide query sees all of the tenant's entries.
    pub fn visible_to(&self, scope: &Scope) -> bool {
        if self.tenant_id != scope.tenant_id {
            return false;
        }
        match (&scope.agent_id, &self.agent_id) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(wanted), Some(own)) => wanted == own,
        }
    }
}

/// A retrieval hit annotated with its similarity in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub score: f64,
}

/// Reject blank question or answer text before it reaches a store.
pub fn validate_pair(question: &str, answer: &str) -> Result<(), ChatError> {
    if question.trim().is_empty() || answer.trim().is_empty() {
        return Err(ChatError::InvalidInput("question and answer are required".to_string()));
    }
    Ok(())
}

/// Durable table of question/answer pairs.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn insert(&self, scope: &Scope, question: &str, answer: &str) -> Result<KnowledgeEntry, StoreError>;

    /// All entries of a tenant, oldest first.
    async fn list(&self, tenant_id: &str) -> Result<Vec<KnowledgeEntry>, StoreError>;

    /// Delete by id. Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Number of entries visible to `scope`.
    async fn count(&self, scope: &Scope) -> Result<usize, StoreError>;

    /// Up to `limit` entries visible to `scope`, by descending similarity of
    /// their question to `query`; ties keep insertion order. Zero-score
    /// entries are omitted.
    async fn search(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<ScoredEntry>, StoreError>;
}
