//! Cheap skip gates (§4.F step 1) — decide, without an LLM call, whether a
//! turn is worth extracting from. Plain functions returning `bool`,
//! grounded on the allow/deny-by-default heuristic style the teacher used
//! for its channel gate checks.

const GREETING_TOKENS: &[&str] = &[
    "gm", "gn", "hi", "hey", "hello", "yo", "sup", "morning", "night", "bye", "ok", "okay",
    "thanks", "thx", "lol", "haha", "k", "np",
];

const HEDGING_WORDS: &[&str] = &["maybe", "might", "probably", "i think", "not sure"];

const TIME_DATE_CUES: &[&str] = &[
    "today", "tomorrow", "tonight", "yesterday", "monday", "tuesday", "wednesday", "thursday",
    "friday", "saturday", "sunday", "am", "pm", "next week", "next month", "january", "february",
    "march", "april", "may", "june", "july", "august", "september", "october", "november",
    "december",
];

const ACTION_VERB_CUES: &[&str] = &[
    "i am", "i'm", "i will", "i'll", "i went", "i started", "i moved", "i quit", "i got",
    "i'm going", "she is", "he is", "they are", "we are", "going to", "planning to", "just",
];

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// A turn consisting only of a short acknowledgement/greeting.
pub fn is_pure_greeting(user_text: &str) -> bool {
    let normalized = normalize(user_text);
    let stripped: String = normalized.chars().filter(|c| c.is_alphanumeric()).collect();
    GREETING_TOKENS.contains(&stripped.as_str())
}

/// A turn with no alphanumeric content at all (pure emoji/punctuation or
/// whitespace).
pub fn is_pure_emoji_or_whitespace(user_text: &str) -> bool {
    !user_text.chars().any(|c| c.is_alphanumeric())
}

fn is_short_without_signal_chars(user_text: &str) -> bool {
    let trimmed = user_text.trim();
    trimmed.chars().count() < 8 && !trimmed.chars().any(|c| c.is_ascii_digit()) && !trimmed.contains('@')
}

fn has_capitalized_word(text: &str) -> bool {
    text.split_whitespace().any(|w| {
        let mut chars = w.chars();
        let first_alpha: String = w.chars().filter(|c| c.is_alphabetic()).collect();
        matches!(chars.next(), Some(c) if c.is_uppercase()) && first_alpha.chars().count() >= 3
    })
}

fn has_time_or_date_cue(text: &str) -> bool {
    let normalized = normalize(text);
    TIME_DATE_CUES.iter().any(|cue| normalized.contains(cue))
}

fn has_action_verb_cue(text: &str) -> bool {
    let normalized = normalize(text);
    ACTION_VERB_CUES.iter().any(|cue| normalized.contains(cue))
}

/// At least one of: a digit, `@`, a capitalized word ≥3 letters, a
/// time/date cue, or a first-/third-person action-verb cue.
pub fn has_positive_signal(user_text: &str) -> bool {
    user_text.chars().any(|c| c.is_ascii_digit())
        || user_text.contains('@')
        || has_capitalized_word(user_text)
        || has_time_or_date_cue(user_text)
        || has_action_verb_cue(user_text)
}

pub fn contains_hedging(text: &str) -> bool {
    let normalized = normalize(text);
    HEDGING_WORDS.iter().any(|w| normalized.contains(w))
}

/// §4.F step 1: whether this turn should skip the extraction call
/// entirely (the episode is still marked extracted by the caller).
pub fn should_skip_extraction(user_text: &str) -> bool {
    if is_short_without_signal_chars(user_text) {
        return true;
    }
    if is_pure_greeting(user_text) {
        return true;
    }
    if is_pure_emoji_or_whitespace(user_text) {
        return true;
    }
    !has_positive_signal(user_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_greeting_is_skipped() {
        assert!(should_skip_extraction("gm"));
        assert!(should_skip_extraction("  Hey!  "));
    }

    #[test]
    fn pure_emoji_is_skipped() {
        assert!(should_skip_extraction("\u{1F923} \u{1F602}"));
        assert!(should_skip_extraction("   "));
    }

    #[test]
    fn short_text_without_signal_is_skipped() {
        assert!(should_skip_extraction("lol nice"));
    }

    #[test]
    fn text_with_a_digit_is_not_skipped() {
        assert!(!should_skip_extraction("I'm turning 28 next month"));
    }

    #[test]
    fn text_with_an_action_verb_and_no_other_signal_is_not_skipped() {
        assert!(!should_skip_extraction("I just started a new job at Initech"));
    }

    #[test]
    fn plain_sentence_without_any_signal_is_skipped() {
        assert!(should_skip_extraction("that sounds like a good plan honestly"));
    }
}
