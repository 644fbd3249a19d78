pub mod memory_store;

#[cfg(feature = "postgres-backend")]
pub mod pg_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{Role, Scope};

pub use memory_store::InMemorySessionLog;

/// One message exchanged in a conversation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    #[serde(rename = "user_id")]
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn scope(&self) -> Scope {
        Scope::new(self.tenant_id.clone(), self.agent_id.clone())
    }
}

/// Append-only log of chat turns.
///
/// Implementations assign the turn id and creation timestamp. Timestamps are
/// strictly increasing per store so "the turn before X" is well defined.
#[async_trait]
pub trait SessionLog: Send + Sync {
    /// Append a turn and return it as stored.
    async fn append(&self, scope: &Scope, role: Role, message: &str) -> Result<ChatTurn, StoreError>;

    /// Fetch a turn by id.
    async fn get(&self, turn_id: &str) -> Result<Option<ChatTurn>, StoreError>;

    /// Most recent turn in exactly this tenant/agent scope created strictly before `before`.
    async fn latest_before(
        &self,
        scope: &Scope,
        before: DateTime<Utc>,
    ) -> Result<Option<ChatTurn>, StoreError>;
}
