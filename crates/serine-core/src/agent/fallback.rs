//! Escalating "I don't know" replies for low-confidence retrievals.

use dashmap::DashMap;

pub const FALLBACK_MESSAGES: [&str; 3] = [
    "I'm not sure about that. Could you rephrase your question?",
    "I still couldn't find an answer to that. Try asking in a different way or with more detail.",
    "I don't have that information yet. Please contact support for further help.",
];

/// Fallback reply for the `level`-th consecutive miss (1-based). Levels past
/// the last message repeat it.
pub fn fallback_message(level: u32) -> &'static str {
    let idx = (level.clamp(1, FALLBACK_MESSAGES.len() as u32) - 1) as usize;
    FALLBACK_MESSAGES[idx]
}

/// Per-tenant count of consecutive low-confidence retrievals.
///
/// Best effort: concurrent requests for one tenant may race, which only
/// changes which canned sentence is shown.
pub trait FallbackTracker: Send + Sync {
    /// Count one more miss and return the new streak length.
    fn record_miss(&self, tenant_id: &str) -> u32;

    /// Clear the streak after a confident retrieval.
    fn reset(&self, tenant_id: &str);
}

/// Process-local tracker; state is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryFallbackTracker {
    streaks: DashMap<String, u32>,
}

impl InMemoryFallbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, tenant_id: &str) -> u32 {
        self.streaks.get(tenant_id).map(|v| *v).unwrap_or(0)
    }
}

impl FallbackTracker for InMemoryFallbackTracker {
    fn record_miss(&self, tenant_id: &str) -> u32 {
        let mut streak = self.streaks.entry(tenant_id.to_string()).or_insert(0);
        *streak = streak.saturating_add(1);
        *streak
    }

    fn reset(&self, tenant_id: &str) {
        self.streaks.remove(tenant_id);
    }
}
