#![cfg(feature = "http-api")]
//! HTTP surface exercised through the router without binding a socket.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{HarnessBuilder, TENANT};
use serine_core::config::{Config, VariantPlan};
use serine_core::service::accounts::{AccountStore, BillingPeriod, InMemoryAccountStore, Plan};
use serine_core::service::billing::sign_payload;
use serine_core::service::http::{create_router, AppState};

const SECRET: &str = "whsec_test";

struct TestApp {
    router: Router,
    accounts: Arc<InMemoryAccountStore>,
}

fn app() -> TestApp {
    let harness = HarnessBuilder::new().build();
    let mut config = Config::default();
    config.billing.webhook_secret = SECRET.to_string();
    config.billing.variants.insert(
        "111".to_string(),
        VariantPlan {
            plan: Plan::Starter,
            billing: BillingPeriod::Monthly,
        },
    );

    let accounts = Arc::new(InMemoryAccountStore::new());
    let state = Arc::new(AppState::new(config, harness.pipeline.clone(), accounts.clone()));
    TestApp {
        router: create_router(state),
        accounts,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn train(router: &Router, question: &str, answer: &str) -> String {
    let (status, body) = send(
        router,
        post_json("/api/qa", json!({ "userId": TENANT, "question": question, "answer": answer })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    body["insertedId"].as_str().unwrap().to_string()
}

async fn chat(router: &Router, message: &str) -> (StatusCode, Value) {
    send(router, post_json("/api/chat", json!({ "userId": TENANT, "message": message }))).await
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_chat_requires_message_and_tenant() {
    let app = app();

    let (status, body) = send(&app.router, post_json("/api/chat", json!({ "userId": TENANT }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(&app.router, post_json("/api/chat", json!({ "message": "hello" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_untrained_tenant() {
    let app = app();
    let (status, body) = chat(&app.router, "What are your hours?").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["replyText"].as_str().unwrap().contains("haven't trained"));
    assert!(body["turnId"].is_null());
}

#[tokio::test]
async fn test_knowledge_create_list_delete() {
    let app = app();
    let id = train(&app.router, "What are your hours?", "9am-5pm").await;

    let (status, body) = send(&app.router, get(&format!("/api/qa/{TENANT}"))).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["answer"], "9am-5pm");

    let (status, _) = send(
        &app.router,
        post_json("/api/qa", json!({ "userId": TENANT, "question": "  ", "answer": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let delete = |id: &str| Request::delete(format!("/api/qa/{id}")).body(Body::empty()).unwrap();
    let (status, _) = send(&app.router, delete(&id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app.router, delete(&id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chat_then_feedback() {
    let app = app();
    train(&app.router, "Where is my order?", "Check the tracking link in your email").await;

    let (status, body) = chat(&app.router, "Where is my order?").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["replyText"].as_str().unwrap().contains("tracking link"));
    let turn_id = body["turnId"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app.router,
        post_json("/api/feedback", json!({ "userId": TENANT, "sessionId": turn_id, "feedback": "meh" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json("/api/feedback", json!({ "userId": TENANT, "sessionId": "missing", "feedback": "positive" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app.router,
        post_json("/api/feedback", json!({ "userId": TENANT, "sessionId": turn_id, "feedback": "negative" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"], "Where is my order?");
    assert_eq!(body["data"]["sentiment_label"], "negative");

    let (status, _) = send(
        &app.router,
        post_json(
            "/api/feedback",
            json!({ "userId": TENANT, "agentId": "other", "sessionId": turn_id, "feedback": "positive" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_and_usage() {
    let app = app();
    train(&app.router, "What are your hours?", "9am-5pm").await;
    chat(&app.router, "What are your hours?").await;

    let (status, body) = send(&app.router, get(&format!("/api/chat_metrics?userId={TENANT}&range=7d"))).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["total_messages"], 2);
    assert_eq!(rows[0]["date"], "2024-03-10");

    let (status, _) = send(&app.router, get(&format!("/api/chat_metrics?userId={TENANT}&range=90d"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, get("/api/chat_metrics")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app.router, get(&format!("/api/usage?userId={TENANT}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["usage"], 2);
    assert_eq!(body["periodStart"], "2024-03-01");
}

#[tokio::test]
async fn test_sentiments_date_window() {
    let app = app();
    train(&app.router, "What are your hours?", "9am-5pm").await;
    chat(&app.router, "I love this, what are your hours?").await;

    let (status, body) = send(
        &app.router,
        get(&format!("/api/chat_sentiments?userId={TENANT}&start_date=2024-03-10&end_date=2024-03-10")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["sentiment_label"], "positive");

    let (_, body) = send(
        &app.router,
        get(&format!("/api/chat_sentiments?userId={TENANT}&start_date=2024-03-11&end_date=2024-03-12")),
    )
    .await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = send(
        &app.router,
        get(&format!("/api/chat_sentiments?userId={TENANT}&start_date=2024-03-12&end_date=2024-03-10")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        get(&format!("/api/chat_sentiments?userId={TENANT}&start_date=2024-03-10&end_date=%2B262142-12-31")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn webhook(body: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/api/webhooks/lemonsqueezy").header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("X-Signature", sig);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

#[tokio::test]
async fn test_webhook_signature_and_plan_change() {
    let app = app();
    let payload = serde_json::to_vec(&json!({
        "meta": { "event_name": "subscription_created", "custom_data": { "user_id": TENANT } },
        "data": { "attributes": { "variant_id": 111 } }
    }))
    .unwrap();

    let (status, _) = send(&app.router, webhook(&payload, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app.router, webhook(&payload, Some("deadbeef"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let signature = sign_payload(&payload, SECRET);
    let (status, body) = send(&app.router, webhook(&payload, Some(&signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], TENANT);

    let account = app.accounts.get(TENANT).await.unwrap().unwrap();
    assert_eq!(account.plan, Plan::Starter);
    assert_eq!(app.accounts.list_agents(TENANT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_agent_limit_and_hotline() {
    let app = app();
    let create = || post_json("/api/agents", json!({ "userId": TENANT, "name": "Support" }));

    let (status, body) = send(&app.router, create()).await;
    assert_eq!(status, StatusCode::OK);
    let agent_id = body["data"]["id"].as_str().unwrap().to_string();

    // Free plan allows a single agent
    let (status, body) = send(&app.router, create()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("FREE"));

    let patch = Request::patch(format!("/api/agents/{agent_id}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "support_hotline": "+1 555 0100" }).to_string()))
        .unwrap();
    let (status, body) = send(&app.router, patch).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["support_hotline"], "+1 555 0100");

    let (status, body) = send(&app.router, get(&format!("/api/agents?userId={TENANT}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
