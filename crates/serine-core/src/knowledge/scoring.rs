use std::collections::HashSet;

use crate::config::ScoringStrategy;

use super::{KnowledgeEntry, ScoredEntry};

/// Similarity between a user query and a stored question, in [0, 1].
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, query: &str, question: &str) -> f64;
}

/// Trigram similarity with the same word splitting and padding as Postgres `pg_trgm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrigramScorer;

impl TrigramScorer {
    fn trigrams(text: &str) -> HashSet<[char; 3]> {
        let mut set = HashSet::new();
        let lower = text.to_lowercase();
        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let padded: Vec<char> = "  ".chars().chain(word.chars()).chain(" ".chars()).collect();
            for w in padded.windows(3) {
                set.insert([w[0], w[1], w[2]]);
            }
        }
        set
    }
}

impl Scorer for TrigramScorer {
    fn name(&self) -> &'static str {
        "trigram"
    }

    fn score(&self, query: &str, question: &str) -> f64 {
        let a = Self::trigrams(query);
        let b = Self::trigrams(question);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let shared = a.intersection(&b).count();
        let union = a.len() + b.len() - shared;
        shared as f64 / union as f64
    }
}

/// Lexical overlap: exact match 10, containment 7, else shared whitespace
/// tokens, scaled by 1/10 and capped at 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordOverlapScorer;

impl WordOverlapScorer {
    const EXACT: f64 = 10.0;
    const CONTAINS: f64 = 7.0;

    fn raw(query: &str, question: &str) -> f64 {
        let m = query.to_lowercase();
        let q = question.to_lowercase();
        if m == q {
            return Self::EXACT;
        }
        if m.contains(&q) || q.contains(&m) {
            return Self::CONTAINS;
        }
        let m_words: HashSet<&str> = m.split_whitespace().collect();
        q.split_whitespace().filter(|w| m_words.contains(w)).count() as f64
    }
}

impl Scorer for WordOverlapScorer {
    fn name(&self) -> &'static str {
        "word_overlap"
    }

    fn score(&self, query: &str, question: &str) -> f64 {
        (Self::raw(query, question) / Self::EXACT).min(1.0)
    }
}

pub fn scorer_for(strategy: ScoringStrategy) -> Box<dyn Scorer> {
    match strategy {
        ScoringStrategy::Trigram => Box::new(TrigramScorer),
        ScoringStrategy::WordOverlap => Box::new(WordOverlapScorer),
    }
}

/// Score `candidates` (given oldest first) against `query` and keep the best `limit`.
pub fn rank(
    query: &str,
    candidates: impl IntoIterator<Item = KnowledgeEntry>,
    limit: usize,
    scorer: &dyn Scorer,
) -> Vec<ScoredEntry> {
    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .map(|entry| {
            let score = scorer.score(query, &entry.question);
            ScoredEntry { entry, score }
        })
        .filter(|s| s.score > 0.0)
        .collect();

    // Stable sort keeps insertion order among equal scores
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}
