use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Role, Scope};

use super::{ChatTurn, SessionLog};

/// Postgres-backed session log over the `sessions` table.
#[derive(Clone)]
pub struct PgSessionLog {
    pool: PgPool,
}

impl PgSessionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_turn(row: sqlx::postgres::PgRow) -> Result<ChatTurn, StoreError> {
    let role: String = row.try_get("role")?;
    let id: Uuid = row.try_get("id")?;
    Ok(ChatTurn {
        id: id.to_string(),
        tenant_id: row.try_get("user_id")?,
        agent_id: row.try_get("agent_id")?,
        role: role.parse().map_err(StoreError::Unavailable)?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl SessionLog for PgSessionLog {
    async fn append(&self, scope: &Scope, role: Role, message: &str) -> Result<ChatTurn, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, agent_id, role, message, created_at)
            VALUES ($1, $2, $3, $4, $5, clock_timestamp())
            RETURNING id, user_id, agent_id, role, message, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&scope.tenant_id)
        .bind(&scope.agent_id)
        .bind(role.as_str())
        .bind(message)
        .fetch_one(&self.pool)
        .await?;

        row_to_turn(row)
    }

    async fn get(&self, turn_id: &str) -> Result<Option<ChatTurn>, StoreError> {
        let Ok(id) = Uuid::parse_str(turn_id) else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT id, user_id, agent_id, role, message, created_at FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_turn).transpose()
    }

    async fn latest_before(
        &self,
        scope: &Scope,
        before: DateTime<Utc>,
    ) -> Result<Option<ChatTurn>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, agent_id, role, message, created_at
            FROM sessions
            WHERE user_id = $1
              AND agent_id IS NOT DISTINCT FROM $2
              AND created_at < $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(&scope.tenant_id)
        .bind(&scope.agent_id)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_turn).transpose()
    }
}
