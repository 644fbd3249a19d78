//! Fast-path intents answered without retrieval.

use once_cell::sync::Lazy;
use regex::Regex;

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(hi|hello|hey|good (morning|afternoon|evening))\b").unwrap()
});

static FAREWELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(thank you|thanks|bye|goodbye|see you|take care)\b").unwrap()
});

pub const FAREWELL_REPLY: &str = "You're welcome! Let me know if there's anything else I can help with.";

/// Message classes that short-circuit the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Farewell,
}

/// Greeting is checked before farewell.
pub fn detect(message: &str) -> Option<Intent> {
    if GREETING.is_match(message) {
        Some(Intent::Greeting)
    } else if FAREWELL.is_match(message) {
        Some(Intent::Farewell)
    } else {
        None
    }
}

/// Time-banded greeting for a local hour of day.
pub fn time_greeting(hour: u32) -> String {
    let salutation = match hour {
        0..=11 => "Good morning!",
        12..=17 => "Good afternoon!",
        _ => "Good evening!",
    };
    format!("{salutation} How can I help you today?")
}

/// Canned reply for a fast-path intent.
pub fn reply_for(intent: Intent, local_hour: u32) -> String {
    match intent {
        Intent::Greeting => time_greeting(local_hour),
        Intent::Farewell => FAREWELL_REPLY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greetings() {
        for msg in ["hi", "Hello there", "HEY!", "good Morning team", "well, good evening"] {
            assert_eq!(detect(msg), Some(Intent::Greeting), "{msg}");
        }
    }

    #[test]
    fn test_greeting_is_whole_word() {
        assert_eq!(detect("this is a thing"), None);
        assert_eq!(detect("which shipping option?"), None);
        assert_eq!(detect("they said so"), None);
    }

    #[test]
    fn test_farewells() {
        for msg in ["Thanks!", "thank you so much", "bye", "Goodbye", "see you later", "take care"] {
            assert_eq!(detect(msg), Some(Intent::Farewell), "{msg}");
        }
    }

    #[test]
    fn test_greeting_beats_farewell() {
        assert_eq!(detect("hi, thanks"), Some(Intent::Greeting));
    }

    #[test]
    fn test_plain_question_has_no_intent() {
        assert_eq!(detect("What are your hours?"), None);
    }

    #[test]
    fn test_time_bands() {
        assert_eq!(time_greeting(0), "Good morning! How can I help you today?");
        assert_eq!(time_greeting(11), "Good morning! How can I help you today?");
        assert_eq!(time_greeting(12), "Good afternoon! How can I help you today?");
        assert_eq!(time_greeting(17), "Good afternoon! How can I help you today?");
        assert_eq!(time_greeting(18), "Good evening! How can I help you today?");
        assert_eq!(time_greeting(23), "Good evening! How can I help you today?");
    }
}
