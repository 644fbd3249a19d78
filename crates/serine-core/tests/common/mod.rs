#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use serine_core::agent::fallback::FallbackTracker;
use serine_core::agent::{ChatPipeline, ChatRequest, Stores};
use serine_core::config::ChatConfig;
use serine_core::error::{ProviderError, StoreError};
use serine_core::knowledge::{InMemoryKnowledgeStore, KnowledgeEntry, KnowledgeStore, ScoredEntry};
use serine_core::metrics::InMemoryMetricsStore;
use serine_core::provider::LlmProvider;
use serine_core::sentiment::InMemorySentimentStore;
use serine_core::session::InMemorySessionLog;
use serine_core::types::{CompletionResponse, FinishReason, Message, Role, Scope, TokenUsage};
use serine_core::util::{Clock, FixedClock};

pub const TENANT: &str = "T1";

/// 2024-03-10 09:00 UTC
pub fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
}

/// Answers with the first `A<n>: ...` line of the grounded context.
#[derive(Default)]
pub struct EchoProvider {
    pub prompts: Mutex<Vec<Vec<Message>>>,
}

#[async_trait]
impl LlmProvider for EchoProvider {
    async fn chat(
        &self,
        messages: &[Message],
        _model: &str,
        _max_tokens: u32,
        _temperature: f64,
    ) -> Result<CompletionResponse, ProviderError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let answer = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| m.content.lines())
            .find_map(|line| {
                let (head, rest) = line.split_once(": ")?;
                let digits = head.strip_prefix('A')?;
                (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then(|| rest.to_string())
            });
        Ok(CompletionResponse {
            content: answer,
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        })
    }

    fn default_model(&self) -> &str {
        "echo"
    }
}

/// Always fails like an unreachable upstream.
pub struct FailingProvider;

#[async_trait]
impl LlmProvider for FailingProvider {
    async fn chat(&self, _: &[Message], _: &str, _: u32, _: f64) -> Result<CompletionResponse, ProviderError> {
        Err(ProviderError::Api {
            status: 503,
            message: "overloaded".to_string(),
        })
    }

    fn default_model(&self) -> &str {
        "failing"
    }
}

/// Sleeps well past any configured timeout.
pub struct SlowProvider;

#[async_trait]
impl LlmProvider for SlowProvider {
    async fn chat(&self, _: &[Message], _: &str, _: u32, _: f64) -> Result<CompletionResponse, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(CompletionResponse {
            content: Some("too late".to_string()),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        })
    }

    fn default_model(&self) -> &str {
        "slow"
    }
}

/// Knowledge store whose search is down while counting still works.
pub struct BrokenSearchStore {
    pub inner: InMemoryKnowledgeStore,
}

#[async_trait]
impl KnowledgeStore for BrokenSearchStore {
    async fn insert(&self, scope: &Scope, question: &str, answer: &str) -> Result<KnowledgeEntry, StoreError> {
        self.inner.insert(scope, question, answer).await
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<KnowledgeEntry>, StoreError> {
        self.inner.list(tenant_id).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn count(&self, scope: &Scope) -> Result<usize, StoreError> {
        self.inner.count(scope).await
    }

    async fn search(&self, _: &Scope, _: &str, _: usize) -> Result<Vec<ScoredEntry>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// A pipeline over in-memory stores kept reachable for assertions.
pub struct Harness {
    pub pipeline: Arc<ChatPipeline>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub sessions: Arc<InMemorySessionLog>,
    pub sentiments: Arc<InMemorySentimentStore>,
    pub metrics: Arc<InMemoryMetricsStore>,
}

pub struct HarnessBuilder {
    provider: Arc<dyn LlmProvider>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    tracker: Option<Arc<dyn FallbackTracker>>,
    config: ChatConfig,
    now: DateTime<Utc>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            provider: Arc::new(EchoProvider::default()),
            knowledge: None,
            tracker: None,
            config: ChatConfig::default(),
            now: morning(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn knowledge(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn FallbackTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut ChatConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn build(self) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(self.now));
        let knowledge = self
            .knowledge
            .unwrap_or_else(|| Arc::new(InMemoryKnowledgeStore::new().with_clock(clock.clone())));
        let sessions = Arc::new(InMemorySessionLog::with_clock(clock.clone()));
        let sentiments = Arc::new(InMemorySentimentStore::with_clock(clock.clone()));
        let metrics = Arc::new(InMemoryMetricsStore::new());

        let stores = Stores {
            knowledge: knowledge.clone(),
            sessions: sessions.clone(),
            sentiments: sentiments.clone(),
            metrics: metrics.clone(),
        };
        let mut pipeline = ChatPipeline::new(stores, self.provider, &self.config).with_clock(clock);
        if let Some(tracker) = self.tracker {
            pipeline = pipeline.with_fallback_tracker(tracker);
        }

        Harness {
            pipeline: Arc::new(pipeline),
            knowledge,
            sessions,
            sentiments,
            metrics,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    pub async fn train(&self, question: &str, answer: &str) {
        self.knowledge
            .insert(&Scope::tenant(TENANT), question, answer)
            .await
            .unwrap();
    }

    pub fn request(message: &str) -> ChatRequest {
        ChatRequest::new(TENANT, None, message)
    }
}
