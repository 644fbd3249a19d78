use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::{Role, Scope};
use crate::util::{Clock, SystemClock};

use super::{ChatTurn, SessionLog};

/// In-memory session log (for local dev/testing).
pub struct InMemorySessionLog {
    turns: RwLock<Vec<ChatTurn>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionLog {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            turns: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Snapshot of every stored turn in append order.
    pub async fn all(&self) -> Vec<ChatTurn> {
        self.turns.read().await.clone()
    }
}

impl Default for InMemorySessionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionLog for InMemorySessionLog {
    async fn append(&self, scope: &Scope, role: Role, message: &str) -> Result<ChatTurn, StoreError> {
        let mut turns = self.turns.write().await;

        // Bump past the previous turn when the clock has not advanced
        let mut created_at = self.clock.now();
        if let Some(last) = turns.last() {
            if created_at <= last.created_at {
                created_at = last.created_at + Duration::microseconds(1);
            }
        }

        let turn = ChatTurn {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: scope.tenant_id.clone(),
            agent_id: scope.agent_id.clone(),
            role,
            message: message.to_string(),
            created_at,
        };
        turns.push(turn.clone());
        Ok(turn)
    }

    async fn get(&self, turn_id: &str) -> Result<Option<ChatTurn>, StoreError> {
        let turns = self.turns.read().await;
        Ok(turns.iter().find(|t| t.id == turn_id).cloned())
    }

    async fn latest_before(
        &self,
        scope: &Scope,
        before: DateTime<Utc>,
    ) -> Result<Option<ChatTurn>, StoreError> {
        let turns = self.turns.read().await;
        Ok(turns
            .iter()
            .filter(|t| t.tenant_id == scope.tenant_id && t.agent_id == scope.agent_id)
            .filter(|t| t.created_at < before)
            .max_by_key(|t| t.created_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::FixedClock;
    use chrono::TimeZone;

    fn frozen() -> InMemorySessionLog {
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        InMemorySessionLog::with_clock(Arc::new(FixedClock(at)))
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_timestamps() {
        let log = frozen();
        let scope = Scope::tenant("t1");
        let a = log.append(&scope, Role::User, "Where is my order?").await.unwrap();
        let b = log.append(&scope, Role::Assistant, "It shipped.").await.unwrap();
        assert!(b.created_at > a.created_at);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let log = InMemorySessionLog::new();
        let turn = log.append(&Scope::tenant("t1"), Role::User, "hi").await.unwrap();
        assert_eq!(log.get(&turn.id).await.unwrap(), Some(turn));
        assert_eq!(log.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_latest_before_respects_scope() {
        let log = frozen();
        let t1 = Scope::agent("t1", "a1");
        let other_agent = Scope::agent("t1", "a2");

        log.append(&t1, Role::User, "first").await.unwrap();
        log.append(&other_agent, Role::User, "other agent").await.unwrap();
        let reply = log.append(&t1, Role::Assistant, "reply").await.unwrap();

        let prev = log.latest_before(&t1, reply.created_at).await.unwrap().unwrap();
        assert_eq!(prev.message, "first");

        let none = log.latest_before(&Scope::tenant("t1"), reply.created_at).await.unwrap();
        assert!(none.is_none());
    }
}
