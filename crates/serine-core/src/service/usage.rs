use chrono::NaiveDate;
use serde::Serialize;

use crate::error::StoreError;
use crate::metrics::MetricsStore;
use crate::util::month_start;

/// Messages counted for a tenant in the current calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyUsage {
    pub tenant_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub usage: u64,
}

/// Sum `total_messages` from the first of `today`'s month through `today`.
pub async fn monthly_usage(
    metrics: &dyn MetricsStore,
    tenant_id: &str,
    today: NaiveDate,
) -> Result<MonthlyUsage, StoreError> {
    let start = month_start(today);
    let usage = metrics.total_messages_between(tenant_id, start, today).await?;
    Ok(MonthlyUsage {
        tenant_id: tenant_id.to_string(),
        period_start: start,
        period_end: today,
        usage,
    })
}
