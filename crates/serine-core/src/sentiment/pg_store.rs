use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::Scope;

use super::{SentimentLabel, SentimentRecord, SentimentStore};

/// `chat_sentiments` table.
pub struct PgSentimentStore {
    pool: PgPool,
}

impl PgSentimentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<SentimentRecord, StoreError> {
        let id: Uuid = row.try_get("id")?;
        let label: String = row.try_get("sentiment_label")?;
        Ok(SentimentRecord {
            id: id.to_string(),
            tenant_id: row.try_get("user_id")?,
            agent_id: row.try_get("agent_id")?,
            message: row.try_get("message")?,
            sentiment_score: row.try_get("sentiment_score")?,
            sentiment_label: label.parse().map_err(StoreError::Unavailable)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl SentimentStore for PgSentimentStore {
    async fn record(
        &self,
        scope: &Scope,
        message: &str,
        label: SentimentLabel,
        score: f64,
    ) -> Result<SentimentRecord, StoreError> {
        let row = sqlx::query(
            "INSERT INTO chat_sentiments (id, user_id, agent_id, message, sentiment_score, sentiment_label) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, user_id, agent_id, message, sentiment_score, sentiment_label, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&scope.tenant_id)
        .bind(&scope.agent_id)
        .bind(message)
        .bind(score)
        .bind(label.as_str())
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_record(&row)
    }

    async fn list(
        &self,
        scope: &Scope,
        range: Option<Range<DateTime<Utc>>>,
    ) -> Result<Vec<SentimentRecord>, StoreError> {
        let (start, end) = match range {
            Some(r) => (Some(r.start), Some(r.end)),
            None => (None, None),
        };
        let rows = sqlx::query(
            "SELECT id, user_id, agent_id, message, sentiment_score, sentiment_label, created_at \
             FROM chat_sentiments \
             WHERE user_id = $1 AND ($2::text IS NULL OR agent_id = $2) \
               AND ($3::timestamptz IS NULL OR created_at >= $3) \
               AND ($4::timestamptz IS NULL OR created_at < $4) \
             ORDER BY created_at DESC",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.agent_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }
}
