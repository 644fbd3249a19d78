//! Grounded prompt assembly: instructions plus retrieved Q&A as context.

use crate::knowledge::ScoredEntry;
use crate::types::Message;

pub const NO_ANSWER_SENTENCE: &str = "I don't have that information.";

/// Build the grounded generation request for a user message.
///
/// The system message carries the instructions and the numbered context
/// blocks; the raw user message follows as its own turn.
pub fn build_grounded_prompt(hits: &[ScoredEntry], message: &str, lang: &str) -> Vec<Message> {
    let mut parts = Vec::new();

    parts.push(format!(
        "You are a helpful support assistant. Answer the user's question using only the \
         context below. If the context does not contain the answer, reply exactly: \"{NO_ANSWER_SENTENCE}\""
    ));
    parts.push(format!("Respond in this language: {lang}."));

    let context = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("Q{n}: {}\nA{n}: {}", hit.entry.question, hit.entry.answer, n = i + 1))
        .collect::<Vec<_>>()
        .join("\n\n");
    parts.push(format!("# Context\n\n{context}"));

    vec![Message::system(parts.join("\n\n")), Message::user(message)]
}
