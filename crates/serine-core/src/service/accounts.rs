//! Tenant accounts, subscription plans, and the agents each plan allows.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, StoreError};

pub const DEFAULT_AGENT_NAME: &str = "Default Agent";

/// Subscription plan tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Starter,
    Growth,
    #[serde(alias = "pro")]
    Professional,
}

impl Plan {
    pub fn max_agents(&self) -> usize {
        match self {
            Plan::Free => 1,
            Plan::Starter | Plan::Growth => 3,
            Plan::Professional => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Growth => "growth",
            Plan::Professional => "professional",
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "growth" => Ok(Plan::Growth),
            "professional" | "pro" => Ok(Plan::Professional),
            _ => Err(format!("Unknown plan: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingPeriod::Monthly),
            "yearly" => Ok(BillingPeriod::Yearly),
            _ => Err(format!("Unknown billing period: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "id")]
    pub tenant_id: String,
    pub plan: Plan,
    pub billing_period: Option<BillingPeriod>,
    pub updated_at: DateTime<Utc>,
}

/// A named chatbot configuration owned by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(rename = "user_id")]
    pub tenant_id: String,
    pub name: String,
    pub support_hotline: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn plan_limit_error(plan: Plan) -> BillingError {
    BillingError::PlanLimit(format!(
        "Your {} plan allows up to {} agents.",
        plan.as_str().to_uppercase(),
        plan.max_agents()
    ))
}

/// User/account store. Tenants without an account row are on the free plan.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<Account>, StoreError>;

    /// Create or update the tenant's plan.
    async fn set_plan(&self, tenant_id: &str, plan: Plan, period: BillingPeriod) -> Result<Account, StoreError>;

    /// Agents of a tenant, oldest first.
    async fn list_agents(&self, tenant_id: &str) -> Result<Vec<Agent>, StoreError>;

    /// Create an agent unless the tenant's plan limit is already reached.
    async fn create_agent(&self, tenant_id: &str, name: &str) -> Result<Agent, BillingError>;

    /// The tenant's first agent, creating "Default Agent" when there is none.
    async fn ensure_default_agent(&self, tenant_id: &str) -> Result<Agent, StoreError>;

    /// Returns `None` for an unknown agent.
    async fn set_support_hotline(&self, agent_id: &str, hotline: &str) -> Result<Option<Agent>, StoreError>;
}

#[derive(Default)]
struct AccountTables {
    accounts: HashMap<String, Account>,
    agents: Vec<Agent>,
}

/// In-memory account store (for local dev/testing). One lock covers both
/// tables so the quota check and the insert are atomic.
#[derive(Default)]
pub struct InMemoryAccountStore {
    tables: RwLock<AccountTables>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_agent(tenant_id: &str, name: &str) -> Agent {
    Agent {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        name: name.to_string(),
        support_hotline: None,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.read().await.accounts.get(tenant_id).cloned())
    }

    async fn set_plan(&self, tenant_id: &str, plan: Plan, period: BillingPeriod) -> Result<Account, StoreError> {
        let account = Account {
            tenant_id: tenant_id.to_string(),
            plan,
            billing_period: Some(period),
            updated_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .accounts
            .insert(tenant_id.to_string(), account.clone());
        Ok(account)
    }

    async fn list_agents(&self, tenant_id: &str) -> Result<Vec<Agent>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.agents.iter().filter(|a| a.tenant_id == tenant_id).cloned().collect())
    }

    async fn create_agent(&self, tenant_id: &str, name: &str) -> Result<Agent, BillingError> {
        let mut tables = self.tables.write().await;
        let plan = tables.accounts.get(tenant_id).map(|a| a.plan).unwrap_or_default();
        let owned = tables.agents.iter().filter(|a| a.tenant_id == tenant_id).count();
        if owned >= plan.max_agents() {
            return Err(plan_limit_error(plan));
        }
        let agent = new_agent(tenant_id, name);
        tables.agents.push(agent.clone());
        Ok(agent)
    }

    async fn ensure_default_agent(&self, tenant_id: &str) -> Result<Agent, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.agents.iter().find(|a| a.tenant_id == tenant_id) {
            return Ok(existing.clone());
        }
        let agent = new_agent(tenant_id, DEFAULT_AGENT_NAME);
        tables.agents.push(agent.clone());
        Ok(agent)
    }

    async fn set_support_hotline(&self, agent_id: &str, hotline: &str) -> Result<Option<Agent>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.agents.iter_mut().find(|a| a.id == agent_id).map(|agent| {
            agent.support_hotline = Some(hotline.to_string());
            agent.clone()
        }))
    }
}

#[cfg(feature = "postgres-backend")]
pub use self::pg::PgAccountStore;

#[cfg(feature = "postgres-backend")]
mod pg {
    use sqlx::{PgPool, Row};

    use super::*;

    /// `users` and `agents` tables.
    pub struct PgAccountStore {
        pool: PgPool,
    }

    impl PgAccountStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        fn row_to_agent(row: &sqlx::postgres::PgRow) -> Result<Agent, StoreError> {
            let id: Uuid = row.try_get("id")?;
            Ok(Agent {
                id: id.to_string(),
                tenant_id: row.try_get("user_id")?,
                name: row.try_get("name")?,
                support_hotline: row.try_get("support_hotline")?,
                created_at: row.try_get("created_at")?,
            })
        }

        fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account, StoreError> {
            let plan: String = row.try_get("plan")?;
            let period: Option<String> = row.try_get("billing_period")?;
            Ok(Account {
                tenant_id: row.try_get("id")?,
                plan: plan.parse().unwrap_or_default(),
                billing_period: period.and_then(|p| p.parse().ok()),
                updated_at: row.try_get("updated_at")?,
            })
        }
    }

    #[async_trait]
    impl AccountStore for PgAccountStore {
        async fn get(&self, tenant_id: &str) -> Result<Option<Account>, StoreError> {
            let row = sqlx::query("SELECT id, plan, billing_period, updated_at FROM users WHERE id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(Self::row_to_account).transpose()
        }

        async fn set_plan(&self, tenant_id: &str, plan: Plan, period: BillingPeriod) -> Result<Account, StoreError> {
            let row = sqlx::query(
                "INSERT INTO users (id, plan, billing_period, updated_at) VALUES ($1, $2, $3, now()) \
                 ON CONFLICT (id) DO UPDATE SET plan = EXCLUDED.plan, \
                    billing_period = EXCLUDED.billing_period, updated_at = now() \
                 RETURNING id, plan, billing_period, updated_at",
            )
            .bind(tenant_id)
            .bind(plan.as_str())
            .bind(period.as_str())
            .fetch_one(&self.pool)
            .await?;
            Self::row_to_account(&row)
        }

        async fn list_agents(&self, tenant_id: &str) -> Result<Vec<Agent>, StoreError> {
            let rows = sqlx::query(
                "SELECT id, user_id, name, support_hotline, created_at FROM agents \
                 WHERE user_id = $1 ORDER BY created_at ASC",
            )
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(Self::row_to_agent).collect()
        }

        async fn create_agent(&self, tenant_id: &str, name: &str) -> Result<Agent, BillingError> {
            let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

            // Row lock on the tenant serializes concurrent creations
            sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
                .bind(tenant_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
            let plan: String = sqlx::query_scalar("SELECT plan FROM users WHERE id = $1 FOR UPDATE")
                .bind(tenant_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::from)?;
            let plan: Plan = plan.parse().unwrap_or_default();

            let owned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents WHERE user_id = $1")
                .bind(tenant_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::from)?;
            if owned as usize >= plan.max_agents() {
                return Err(plan_limit_error(plan));
            }

            let row = sqlx::query(
                "INSERT INTO agents (id, user_id, name) VALUES ($1, $2, $3) \
                 RETURNING id, user_id, name, support_hotline, created_at",
            )
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::from)?;
            let agent = Self::row_to_agent(&row)?;
            tx.commit().await.map_err(StoreError::from)?;
            Ok(agent)
        }

        async fn ensure_default_agent(&self, tenant_id: &str) -> Result<Agent, StoreError> {
            if let Some(existing) = self.list_agents(tenant_id).await?.into_iter().next() {
                return Ok(existing);
            }
            let row = sqlx::query(
                "INSERT INTO agents (id, user_id, name) VALUES ($1, $2, $3) \
                 RETURNING id, user_id, name, support_hotline, created_at",
            )
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(DEFAULT_AGENT_NAME)
            .fetch_one(&self.pool)
            .await?;
            Self::row_to_agent(&row)
        }

        async fn set_support_hotline(&self, agent_id: &str, hotline: &str) -> Result<Option<Agent>, StoreError> {
            let Ok(id) = Uuid::parse_str(agent_id) else {
                return Ok(None);
            };
            let row = sqlx::query(
                "UPDATE agents SET support_hotline = $2 WHERE id = $1 \
                 RETURNING id, user_id, name, support_hotline, created_at",
            )
            .bind(id)
            .bind(hotline)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(Self::row_to_agent).transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_from_str() {
        assert_eq!("free".parse::<Plan>().unwrap(), Plan::Free);
        assert_eq!("Starter".parse::<Plan>().unwrap(), Plan::Starter);
        assert_eq!("pro".parse::<Plan>().unwrap(), Plan::Professional);
        assert!("platinum".parse::<Plan>().is_err());
    }

    #[test]
    fn test_plan_serde_accepts_pro_alias() {
        let plan: Plan = serde_json::from_str("\"pro\"").unwrap();
        assert_eq!(plan, Plan::Professional);
        assert_eq!(serde_json::to_string(&Plan::Starter).unwrap(), "\"starter\"");
    }

    #[test]
    fn test_plan_agent_limits() {
        assert_eq!(Plan::Free.max_agents(), 1);
        assert_eq!(Plan::Growth.max_agents(), 3);
        assert_eq!(Plan::Professional.max_agents(), 10);
    }

    #[tokio::test]
    async fn test_create_agent_enforces_plan() {
        let store = InMemoryAccountStore::new();
        store.create_agent("t1", "Support").await.unwrap();
        let err = store.create_agent("t1", "Sales").await.unwrap_err();
        assert!(matches!(err, BillingError::PlanLimit(ref m) if m.contains("FREE")));

        store.set_plan("t1", Plan::Starter, BillingPeriod::Monthly).await.unwrap();
        store.create_agent("t1", "Sales").await.unwrap();
        assert_eq!(store.list_agents("t1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ensure_default_agent_is_idempotent() {
        let store = InMemoryAccountStore::new();
        let first = store.ensure_default_agent("t1").await.unwrap();
        let second = store.ensure_default_agent("t1").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, DEFAULT_AGENT_NAME);
    }

    #[tokio::test]
    async fn test_set_support_hotline() {
        let store = InMemoryAccountStore::new();
        let agent = store.create_agent("t1", "Support").await.unwrap();
        let updated = store.set_support_hotline(&agent.id, "+1 555 0100").await.unwrap().unwrap();
        assert_eq!(updated.support_hotline.as_deref(), Some("+1 555 0100"));
        assert!(store.set_support_hotline("missing", "x").await.unwrap().is_none());
    }
}
