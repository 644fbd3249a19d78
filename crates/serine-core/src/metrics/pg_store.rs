use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::types::Scope;

use super::{MetricKey, MetricMutation, MetricRow, MetricsStore};

const COLUMNS: &str = "user_id, agent_id, date, total_messages, user_messages, bot_messages, \
    positive_count, neutral_count, negative_count, avg_response_time_ms, satisfaction_score";

/// `chat_metrics` table. Uniqueness of `(user_id, agent_id, date)` treats a
/// null agent as a value, so the upsert below is a single atomic statement.
pub struct PgMetricsStore {
    pool: PgPool,
}

impl PgMetricsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_metric(row: &sqlx::postgres::PgRow) -> Result<MetricRow, StoreError> {
        let count = |col: &str| -> Result<u64, StoreError> { Ok(row.try_get::<i64, _>(col)?.max(0) as u64) };
        let latency: Option<i64> = row.try_get("avg_response_time_ms")?;
        Ok(MetricRow {
            tenant_id: row.try_get("user_id")?,
            agent_id: row.try_get("agent_id")?,
            date: row.try_get("date")?,
            total_messages: count("total_messages")?,
            user_messages: count("user_messages")?,
            bot_messages: count("bot_messages")?,
            positive_count: count("positive_count")?,
            neutral_count: count("neutral_count")?,
            negative_count: count("negative_count")?,
            avg_response_time_ms: latency.map(|v| v.max(0) as u64),
            satisfaction_score: row.try_get("satisfaction_score")?,
        })
    }
}

#[async_trait]
impl MetricsStore for PgMetricsStore {
    async fn upsert_daily(&self, key: &MetricKey, mutation: MetricMutation) -> Result<MetricRow, StoreError> {
        let d = mutation.delta();
        let sql = format!(
            "INSERT INTO chat_metrics ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (user_id, agent_id, date) DO UPDATE SET \
                total_messages = chat_metrics.total_messages + EXCLUDED.total_messages, \
                user_messages = chat_metrics.user_messages + EXCLUDED.user_messages, \
                bot_messages = chat_metrics.bot_messages + EXCLUDED.bot_messages, \
                positive_count = chat_metrics.positive_count + EXCLUDED.positive_count, \
                neutral_count = chat_metrics.neutral_count + EXCLUDED.neutral_count, \
                negative_count = chat_metrics.negative_count + EXCLUDED.negative_count, \
                avg_response_time_ms = COALESCE(EXCLUDED.avg_response_time_ms, chat_metrics.avg_response_time_ms), \
                satisfaction_score = COALESCE(EXCLUDED.satisfaction_score, chat_metrics.satisfaction_score) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&key.tenant_id)
            .bind(&key.agent_id)
            .bind(key.date)
            .bind(d.total as i64)
            .bind(d.user as i64)
            .bind(d.bot as i64)
            .bind(d.positive as i64)
            .bind(d.neutral as i64)
            .bind(d.negative as i64)
            .bind(d.latency_ms.map(|v| v as i64))
            .bind(d.satisfaction)
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_metric(&row)
    }

    async fn history(&self, scope: &Scope, since: Option<NaiveDate>) -> Result<Vec<MetricRow>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM chat_metrics \
             WHERE user_id = $1 AND ($2::text IS NULL OR agent_id = $2) \
               AND ($3::date IS NULL OR date >= $3) \
             ORDER BY date ASC, agent_id ASC NULLS FIRST"
        );
        let rows = sqlx::query(&sql)
            .bind(&scope.tenant_id)
            .bind(&scope.agent_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_metric).collect()
    }

    async fn total_messages_between(&self, tenant_id: &str, from: NaiveDate, to: NaiveDate) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_messages), 0)::bigint FROM chat_metrics \
             WHERE user_id = $1 AND date >= $2 AND date <= $3",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.max(0) as u64)
    }
}
