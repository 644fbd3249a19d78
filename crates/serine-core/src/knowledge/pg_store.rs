use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::ScoringStrategy;
use crate::error::StoreError;
use crate::types::Scope;

use super::scoring::{rank, scorer_for};
use super::{KnowledgeEntry, KnowledgeStore, ScoredEntry};

const VISIBLE: &str = "user_id = $1 AND ($2::text IS NULL OR agent_id IS NULL OR agent_id = $2)";

/// `qa_pairs` table. Trigram search is pushed down to `pg_trgm`.
pub struct PgKnowledgeStore {
    pool: PgPool,
    strategy: ScoringStrategy,
}

impl PgKnowledgeStore {
    pub fn new(pool: PgPool, strategy: ScoringStrategy) -> Self {
        Self { pool, strategy }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<KnowledgeEntry, StoreError> {
        let id: Uuid = row.try_get("id")?;
        Ok(KnowledgeEntry {
            id: id.to_string(),
            tenant_id: row.try_get("user_id")?,
            agent_id: row.try_get("agent_id")?,
            question: row.try_get("question")?,
            answer: row.try_get("answer")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn visible(&self, scope: &Scope) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let sql = format!(
            "SELECT id, user_id, agent_id, question, answer, created_at FROM qa_pairs WHERE {VISIBLE} ORDER BY seq"
        );
        let rows = sqlx::query(&sql)
            .bind(&scope.tenant_id)
            .bind(&scope.agent_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }
}

#[async_trait]
impl KnowledgeStore for PgKnowledgeStore {
    async fn insert(&self, scope: &Scope, question: &str, answer: &str) -> Result<KnowledgeEntry, StoreError> {
        let row = sqlx::query(
            "INSERT INTO qa_pairs (id, user_id, agent_id, question, answer) VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, user_id, agent_id, question, answer, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&scope.tenant_id)
        .bind(&scope.agent_id)
        .bind(question.trim())
        .bind(answer.trim())
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_entry(&row)
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, agent_id, question, answer, created_at FROM qa_pairs WHERE user_id = $1 ORDER BY seq",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM qa_pairs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, scope: &Scope) -> Result<usize, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM qa_pairs WHERE {VISIBLE}");
        let n: i64 = sqlx::query_scalar(&sql)
            .bind(&scope.tenant_id)
            .bind(&scope.agent_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn search(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<ScoredEntry>, StoreError> {
        match self.strategy {
            ScoringStrategy::Trigram => {
                let sql = format!(
                    "SELECT id, user_id, agent_id, question, answer, created_at, \
                     similarity(question, $3)::float8 AS score \
                     FROM qa_pairs WHERE {VISIBLE} AND similarity(question, $3) > 0 \
                     ORDER BY score DESC, seq ASC LIMIT $4"
                );
                let rows = sqlx::query(&sql)
                    .bind(&scope.tenant_id)
                    .bind(&scope.agent_id)
                    .bind(query)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?;
                rows.iter()
                    .map(|row| {
                        Ok(ScoredEntry {
                            entry: Self::row_to_entry(row)?,
                            score: row.try_get("score")?,
                        })
                    })
                    .collect()
            }
            ScoringStrategy::WordOverlap => {
                let candidates = self.visible(scope).await?;
                let scorer = scorer_for(self.strategy);
                Ok(rank(query, candidates, limit, scorer.as_ref()))
            }
        }
    }
}
