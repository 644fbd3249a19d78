use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{self, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::{ChatPipeline, ChatRequest, Feedback};
use crate::config::Config;
use crate::error::{BillingError, ChatError, StoreError};
use crate::knowledge::validate_pair;
use crate::service::accounts::AccountStore;
use crate::service::billing::process_webhook;
use crate::service::usage::monthly_usage;
use crate::types::Scope;
use crate::util::local_date;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the HTTP API.
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<ChatPipeline>,
    pub accounts: Arc<dyn AccountStore>,
}

impl AppState {
    pub fn new(config: Config, pipeline: Arc<ChatPipeline>, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            config,
            pipeline,
            accounts,
        }
    }

    fn today(&self) -> NaiveDate {
        local_date(self.pipeline.clock().now(), self.pipeline.offset())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Client-facing error: a status and a message that never names internal steps.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unavailable(detail: &str) -> Self {
        error!("Upstream failure: {}", detail);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Service temporarily unavailable")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::InvalidInput(msg) => Self::bad_request(msg),
            ChatError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, format!("Not found: {what}")),
            ChatError::UpstreamUnavailable(detail) => Self::unavailable(&detail),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ChatError::from(e).into()
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::MissingSignature => Self::new(StatusCode::UNAUTHORIZED, e.to_string()),
            BillingError::SignatureMismatch => Self::new(StatusCode::FORBIDDEN, e.to_string()),
            BillingError::PlanLimit(msg) => Self::new(StatusCode::FORBIDDEN, msg),
            BillingError::MalformedPayload(_) | BillingError::UnknownVariant(_) => Self::bad_request(e.to_string()),
            BillingError::Store(inner) => inner.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{name} is required")))
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: Option<String>,
    #[serde(alias = "userId")]
    pub tenant_id: Option<String>,
    pub agent_id: Option<String>,
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBody {
    #[serde(alias = "userId")]
    pub tenant_id: Option<String>,
    pub agent_id: Option<String>,
    #[serde(alias = "sessionId")]
    pub turn_id: Option<String>,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeQuery {
    #[serde(alias = "userId")]
    pub tenant_id: Option<String>,
    pub agent_id: Option<String>,
    pub range: Option<String>,
    #[serde(alias = "start_date")]
    pub start: Option<NaiveDate>,
    #[serde(alias = "end_date")]
    pub end: Option<NaiveDate>,
}

impl ScopeQuery {
    fn scope(&self) -> Result<Scope, ApiError> {
        let tenant = required(&self.tenant_id, "tenantId")?;
        Ok(Scope::new(tenant, optional(&self.agent_id)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBody {
    #[serde(alias = "userId")]
    pub tenant_id: Option<String>,
    pub agent_id: Option<String>,
    pub question: Option<String>,
    pub answer: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBody {
    #[serde(alias = "userId")]
    pub tenant_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HotlineBody {
    #[serde(alias = "supportHotline")]
    pub support_hotline: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub commit: String,
}

/// Parse a `range` of `7d` or `30d` into a day count.
pub fn parse_range(range: Option<&str>) -> Result<Option<i64>, ApiError> {
    match range.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some("7d") => Ok(Some(7)),
        Some("30d") => Ok(Some(30)),
        Some(other) => Err(ApiError::bad_request(format!(
            "range must be \"7d\" or \"30d\", got \"{other}\""
        ))),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PATCH,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
}

/// Create the axum Router with all API routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        // Chat pipeline
        .route("/api/chat", post(handle_chat))
        .route("/api/feedback", post(handle_feedback))
        .route("/api/chat_metrics", get(handle_metrics))
        .route("/api/chat_sentiments", get(handle_sentiments))
        .route("/api/usage", get(handle_usage))
        // Knowledge
        .route("/api/qa", post(handle_create_knowledge))
        .route("/api/qa/{id}", get(handle_list_knowledge).delete(handle_delete_knowledge))
        // Agents
        .route("/api/agents", get(handle_list_agents).post(handle_create_agent))
        .route("/api/agents/{id}", axum::routing::patch(handle_update_agent))
        // Webhooks
        .route("/api/webhooks/lemonsqueezy", post(handle_lemonsqueezy_webhook))
        // Health
        .route("/health", get(handle_health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/chat
async fn handle_chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let request = ChatRequest {
        tenant_id: body.tenant_id.unwrap_or_default(),
        agent_id: body.agent_id,
        message: body.message.unwrap_or_default(),
        lang: body.lang,
    };
    let reply = state.pipeline.handle_message(&request).await?;
    Ok(Json(reply))
}

/// POST /api/feedback
async fn handle_feedback(
    State(state): State<Arc<AppState>>,
    body: Result<Json<FeedbackBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let tenant_id = required(&body.tenant_id, "tenantId")?;
    let turn_id = required(&body.turn_id, "turnId")?;
    let feedback: Feedback = required(&body.feedback, "feedback")?.parse()?;

    let record = state
        .pipeline
        .record_feedback(tenant_id, body.agent_id.as_deref(), turn_id, feedback)
        .await?;
    Ok(Json(json!({ "success": true, "data": record })))
}

/// GET /api/chat_metrics?tenantId&agentId&range
async fn handle_metrics(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ScopeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let scope = query.scope()?;
    let since = parse_range(query.range.as_deref())?.map(|days| state.today() - Duration::days(days));

    let rows = state.pipeline.stores().metrics.history(&scope, since).await?;
    info!("Returning {} metric rows for {}", rows.len(), scope);
    Ok(Json(DataResponse { data: rows }))
}

/// GET /api/chat_sentiments?tenantId&agentId&start&end
async fn handle_sentiments(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ScopeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let scope = query.scope()?;

    // Both bounds or none; the end date is inclusive
    let range = match (query.start, query.end) {
        (Some(start), Some(end)) => {
            if end < start {
                return Err(ApiError::bad_request("end must not be before start"));
            }
            let offset = state.pipeline.offset();
            let at_midnight = |d: NaiveDate| {
                offset
                    .from_local_datetime(&d.and_time(NaiveTime::MIN))
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| ApiError::bad_request("invalid date"))
            };
            let after_end = end.succ_opt().ok_or_else(|| ApiError::bad_request("invalid date"))?;
            Some(at_midnight(start)?..at_midnight(after_end)?)
        }
        _ => None,
    };

    let records = state.pipeline.stores().sentiments.list(&scope, range).await?;
    Ok(Json(DataResponse { data: records }))
}

/// GET /api/usage?tenantId
async fn handle_usage(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ScopeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let tenant_id = required(&query.tenant_id, "tenantId")?;
    let usage = monthly_usage(state.pipeline.stores().metrics.as_ref(), tenant_id, state.today()).await?;
    Ok(Json(usage))
}

/// POST /api/qa
async fn handle_create_knowledge(
    State(state): State<Arc<AppState>>,
    body: Result<Json<KnowledgeBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let tenant_id = required(&body.tenant_id, "tenantId")?;
    let question = body.question.as_deref().unwrap_or("");
    let answer = body.answer.as_deref().unwrap_or("");
    validate_pair(question, answer)?;

    let scope = Scope::new(tenant_id, optional(&body.agent_id));
    let entry = state.pipeline.stores().knowledge.insert(&scope, question, answer).await?;
    info!("Added knowledge {} for {}", entry.id, scope);
    Ok(Json(json!({ "success": true, "insertedId": entry.id })))
}

/// GET /api/qa/{tenantId}
async fn handle_list_knowledge(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.pipeline.stores().knowledge.list(&tenant_id).await?;
    Ok(Json(DataResponse { data: entries }))
}

/// DELETE /api/qa/{id}
async fn handle_delete_knowledge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.pipeline.stores().knowledge.delete(&id).await? {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, "Knowledge entry not found"))
    }
}

/// GET /api/agents?tenantId
async fn handle_list_agents(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ScopeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let tenant_id = required(&query.tenant_id, "tenantId")?;
    let agents = state.accounts.list_agents(tenant_id).await?;
    Ok(Json(DataResponse { data: agents }))
}

/// POST /api/agents
async fn handle_create_agent(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AgentBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let tenant_id = required(&body.tenant_id, "tenantId")?;
    let name = required(&body.name, "name")?;
    let agent = state.accounts.create_agent(tenant_id, name).await?;
    info!("Created agent {} for {}", agent.id, tenant_id);
    Ok(Json(DataResponse { data: agent }))
}

/// PATCH /api/agents/{id}
async fn handle_update_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<HotlineBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let hotline = body
        .support_hotline
        .ok_or_else(|| ApiError::bad_request("support_hotline must be a string"))?;
    match state.accounts.set_support_hotline(&id, &hotline).await? {
        Some(agent) => Ok(Json(DataResponse { data: agent })),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "Agent not found")),
    }
}

/// POST /api/webhooks/lemonsqueezy
async fn handle_lemonsqueezy_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    info!("Payment webhook received: {} bytes", body.len());
    let signature = headers
        .get("x-signature")
        .or_else(|| headers.get("x-hook-signature"))
        .and_then(|v| v.to_str().ok());

    let outcome = process_webhook(&state.config.billing, state.accounts.as_ref(), signature, &body).await?;
    Ok(Json(outcome))
}

/// GET /health
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        commit: crate::GIT_HASH.to_string(),
    })
}

/// Start the HTTP server on the given address.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range(None).unwrap(), None);
        assert_eq!(parse_range(Some("")).unwrap(), None);
        assert_eq!(parse_range(Some("7d")).unwrap(), Some(7));
        assert_eq!(parse_range(Some("30d")).unwrap(), Some(30));
        assert!(parse_range(Some("90d")).is_err());
    }

    #[test]
    fn test_billing_errors_map_to_status() {
        let status = |e: BillingError| ApiError::from(e).status;
        assert_eq!(status(BillingError::MissingSignature), StatusCode::UNAUTHORIZED);
        assert_eq!(status(BillingError::SignatureMismatch), StatusCode::FORBIDDEN);
        assert_eq!(status(BillingError::PlanLimit("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status(BillingError::UnknownVariant("1".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upstream_errors_hide_detail() {
        let err = ApiError::from(ChatError::UpstreamUnavailable("pg: connection refused".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("pg"));
    }
}
