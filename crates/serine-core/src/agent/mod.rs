//! The chat-answering pipeline: fast paths, retrieval, confidence gate,
//! grounded generation, and the per-turn bookkeeping around them.

pub mod fallback;
pub mod intent;
pub mod prompt;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ChatConfig, ScoringStrategy};
use crate::error::{ChatError, ProviderError};
use crate::knowledge::{scorer_for, InMemoryKnowledgeStore, KnowledgeStore, ScoredEntry};
use crate::metrics::{InMemoryMetricsStore, MetricKey, MetricMutation, MetricsStore};
use crate::provider::LlmProvider;
use crate::sentiment::{classify, InMemorySentimentStore, SentimentLabel, SentimentRecord, SentimentStore};
use crate::session::{InMemorySessionLog, SessionLog};
use crate::types::{Role, Scope};
use crate::util::{local_date, local_hour, offset_from_minutes, truncate_string, Clock, SystemClock};

use self::fallback::{fallback_message, FallbackTracker, InMemoryFallbackTracker};
use self::prompt::build_grounded_prompt;

pub const NO_KNOWLEDGE_REPLY: &str =
    "You haven't trained your assistant yet. Go to 'My Agents' and add some Q&A pairs or scrape your site.";
pub const GENERATION_FAILED_REPLY: &str = "Sorry, I could not understand.";
pub const DEFAULT_LANG: &str = "en";

/// One inbound end-user message.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub message: String,
    pub lang: Option<String>,
}

impl ChatRequest {
    pub fn new(tenant_id: impl Into<String>, agent_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id,
            message: message.into(),
            lang: None,
        }
    }
}

/// Reply to a chat request. `turn_id` is the logged assistant turn; it is
/// absent when nothing was logged (tenant without knowledge).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply_text: String,
    pub turn_id: Option<String>,
}

/// Thumbs up or down on an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

impl Feedback {
    pub fn label(&self) -> SentimentLabel {
        match self {
            Feedback::Positive => SentimentLabel::Positive,
            Feedback::Negative => SentimentLabel::Negative,
        }
    }
}

impl std::str::FromStr for Feedback {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "positive" => Ok(Feedback::Positive),
            "negative" => Ok(Feedback::Negative),
            other => Err(ChatError::InvalidInput(format!(
                "feedback must be \"positive\" or \"negative\", got \"{other}\""
            ))),
        }
    }
}

/// Durable collaborators the pipeline writes to and reads from.
#[derive(Clone)]
pub struct Stores {
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub sessions: Arc<dyn SessionLog>,
    pub sentiments: Arc<dyn SentimentStore>,
    pub metrics: Arc<dyn MetricsStore>,
}

impl Stores {
    /// Process-local stores sharing one clock.
    pub fn in_memory(scoring: ScoringStrategy, clock: Arc<dyn Clock>) -> Self {
        let knowledge = InMemoryKnowledgeStore::with_scorer(scorer_for(scoring)).with_clock(clock.clone());
        Self {
            knowledge: Arc::new(knowledge),
            sessions: Arc::new(InMemorySessionLog::with_clock(clock.clone())),
            sentiments: Arc::new(InMemorySentimentStore::with_clock(clock)),
            metrics: Arc::new(InMemoryMetricsStore::new()),
        }
    }
}

/// Per-request orchestrator. Cheap to share behind an `Arc`.
pub struct ChatPipeline {
    stores: Stores,
    fallback: Arc<dyn FallbackTracker>,
    provider: Arc<dyn LlmProvider>,
    clock: Arc<dyn Clock>,
    model: String,
    max_tokens: u32,
    temperature: f64,
    threshold: f64,
    top_k: usize,
    timeout: Duration,
    offset: FixedOffset,
}

impl ChatPipeline {
    pub fn new(stores: Stores, provider: Arc<dyn LlmProvider>, config: &ChatConfig) -> Self {
        let model = if config.model.trim().is_empty() {
            provider.default_model().to_string()
        } else {
            config.model.clone()
        };
        Self {
            stores,
            fallback: Arc::new(InMemoryFallbackTracker::new()),
            provider,
            clock: Arc::new(SystemClock),
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            threshold: config.similarity_threshold,
            top_k: config.top_k.max(1),
            timeout: Duration::from_secs(config.generation_timeout_secs.max(1)),
            offset: offset_from_minutes(config.utc_offset_minutes),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fallback_tracker(mut self, tracker: Arc<dyn FallbackTracker>) -> Self {
        self.fallback = tracker;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Answer one message.
    ///
    /// Writes already committed (user turn, sentiment, metrics) stay in place
    /// when a later store call fails.
    pub async fn handle_message(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        let tenant_id = request.tenant_id.trim();
        let message = request.message.trim();
        if tenant_id.is_empty() {
            return Err(ChatError::InvalidInput("tenantId is required".to_string()));
        }
        if message.is_empty() {
            return Err(ChatError::InvalidInput("message is required".to_string()));
        }
        let agent_id = request
            .agent_id
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from);
        let scope = Scope::new(tenant_id, agent_id);
        let lang = request.lang.as_deref().filter(|l| !l.trim().is_empty()).unwrap_or(DEFAULT_LANG);

        info!("Chat request for {}: {}", scope, truncate_string(message, 80, "..."));

        if self.stores.knowledge.count(&scope).await? == 0 {
            info!("No knowledge for {}, skipping pipeline", scope);
            return Ok(ChatReply {
                reply_text: NO_KNOWLEDGE_REPLY.to_string(),
                turn_id: None,
            });
        }

        let now = self.clock.now();
        let key = MetricKey::new(&scope, local_date(now, self.offset));

        if let Some(intent) = intent::detect(message) {
            debug!("Fast path {:?} for {}", intent, scope);
            let reply = intent::reply_for(intent, local_hour(now, self.offset));
            let turn = self.stores.sessions.append(&scope, Role::Assistant, &reply).await?;
            self.stores
                .metrics
                .upsert_daily(&key, MetricMutation::RecordAssistantTurn { latency_ms: None, satisfaction: None })
                .await?;
            return Ok(ChatReply {
                reply_text: reply,
                turn_id: Some(turn.id),
            });
        }

        self.stores.sessions.append(&scope, Role::User, message).await?;

        let (label, score) = classify(message);
        self.stores.sentiments.record(&scope, message, label, score).await?;
        self.stores
            .metrics
            .upsert_daily(&key, MetricMutation::RecordUserTurn(label))
            .await?;

        let hits = self.stores.knowledge.search(&scope, message, self.top_k).await?;
        let best = hits.first().map(|h| h.score).unwrap_or(0.0);
        debug!("Retrieved {} candidates for {}, best score {:.3}", hits.len(), scope, best);

        let (reply, assistant_mutation) = if hits.is_empty() || best < self.threshold {
            let level = self.fallback.record_miss(&scope.tenant_id);
            info!("Low confidence ({:.3}) for {}, fallback level {}", best, scope, level);
            (
                fallback_message(level).to_string(),
                MetricMutation::RecordAssistantTurn { latency_ms: None, satisfaction: None },
            )
        } else {
            self.fallback.reset(&scope.tenant_id);
            let (reply, latency_ms) = self.generate(&hits, message, lang).await;
            (
                reply,
                MetricMutation::RecordAssistantTurn {
                    latency_ms: Some(latency_ms),
                    satisfaction: Some(score),
                },
            )
        };

        let turn = self.stores.sessions.append(&scope, Role::Assistant, &reply).await?;
        self.stores.metrics.upsert_daily(&key, assistant_mutation).await?;

        Ok(ChatReply {
            reply_text: reply,
            turn_id: Some(turn.id),
        })
    }

    /// Single bounded generation attempt. Failures become the canned apology.
    async fn generate(&self, hits: &[ScoredEntry], message: &str, lang: &str) -> (String, u64) {
        let messages = build_grounded_prompt(hits, message, lang);

        let start = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.provider.chat(&messages, &self.model, self.max_tokens, self.temperature),
        )
        .await
        .unwrap_or_else(|_| Err(ProviderError::Timeout(self.timeout.as_secs())));
        let latency_ms = start.elapsed().as_millis() as u64;

        let reply = match result {
            Ok(response) => match response.text() {
                Some(text) => {
                    info!("Generated reply in {}ms", latency_ms);
                    text.to_string()
                }
                None => {
                    warn!("Generation returned no usable content ({:?})", response.finish_reason);
                    GENERATION_FAILED_REPLY.to_string()
                }
            },
            Err(e) => {
                warn!("Generation failed after {}ms: {}", latency_ms, e);
                GENERATION_FAILED_REPLY.to_string()
            }
        };
        (reply, latency_ms)
    }

    /// Attach end-user feedback on an assistant turn to the message that preceded it.
    ///
    /// The turn's own scope is authoritative. A caller-supplied agent id that
    /// disagrees with it is rejected.
    pub async fn record_feedback(
        &self,
        tenant_id: &str,
        agent_id: Option<&str>,
        turn_id: &str,
        feedback: Feedback,
    ) -> Result<SentimentRecord, ChatError> {
        let tenant_id = tenant_id.trim();
        let turn_id = turn_id.trim();
        if tenant_id.is_empty() {
            return Err(ChatError::InvalidInput("tenantId is required".to_string()));
        }
        if turn_id.is_empty() {
            return Err(ChatError::InvalidInput("turnId is required".to_string()));
        }

        let turn = self
            .stores
            .sessions
            .get(turn_id)
            .await?
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| ChatError::NotFound(format!("turn {turn_id}")))?;

        let scope = turn.scope();
        if let Some(agent_id) = agent_id.map(str::trim).filter(|a| !a.is_empty()) {
            if scope.agent_id.as_deref() != Some(agent_id) {
                return Err(ChatError::InvalidInput(format!(
                    "turn {turn_id} does not belong to agent {agent_id}"
                )));
            }
        }
        let message = match self.stores.sessions.latest_before(&scope, turn.created_at).await? {
            Some(previous) => previous.message,
            None => turn.message,
        };

        let label = feedback.label();
        let record = self
            .stores
            .sentiments
            .record(&scope, &message, label, label.score())
            .await?;
        info!("Recorded {} feedback for turn {} ({})", label, turn_id, scope);
        Ok(record)
    }
}
