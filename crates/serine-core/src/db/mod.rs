//! Postgres connection pool, migrations, and the store wiring on top of them.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::agent::Stores;
use crate::config::{DatabaseConfig, ScoringStrategy};
use crate::error::StoreError;
use crate::knowledge::pg_store::PgKnowledgeStore;
use crate::metrics::pg_store::PgMetricsStore;
use crate::sentiment::pg_store::PgSentimentStore;
use crate::service::accounts::PgAccountStore;
use crate::session::pg_store::PgSessionLog;
use crate::util::mask_secret;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.url)
            .await?;
        info!("Connected to Postgres at {}", mask_secret(&config.url));
        Ok(Self { pool })
    }

    /// Apply the embedded `migrations/` folder.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Applying migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!("Migrations applied");
        Ok(())
    }

    /// Postgres-backed pipeline stores sharing this pool.
    pub fn stores(&self, scoring: ScoringStrategy) -> Stores {
        Stores {
            knowledge: Arc::new(PgKnowledgeStore::new(self.pool.clone(), scoring)),
            sessions: Arc::new(PgSessionLog::new(self.pool.clone())),
            sentiments: Arc::new(PgSentimentStore::new(self.pool.clone())),
            metrics: Arc::new(PgMetricsStore::new(self.pool.clone())),
        }
    }

    pub fn accounts(&self) -> PgAccountStore {
        PgAccountStore::new(self.pool.clone())
    }
}
