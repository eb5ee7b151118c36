//! The strict JSON schema the extraction/verification/reconciliation LLM
//! calls are constrained to (§4.F steps 2-3), plus the evidence-quote and
//! confidence-tiering gates applied to what comes back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vigil_memory::types::ConfidenceTier;

use crate::gates::contains_hedging;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutput {
    #[serde(default)]
    pub facts: Vec<CandidateFact>,
    #[serde(default)]
    pub events: Vec<CandidateEvent>,
    #[serde(default)]
    pub open_loops: Vec<CandidateOpenLoop>,
    #[serde(default)]
    pub resolutions: Vec<CandidateResolution>,
    #[serde(default)]
    pub person_update: Option<CandidatePersonUpdate>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFact {
    pub subject: String,
    pub content: String,
    pub category: String,
    pub fact_type: String,
    pub temporal_scope: String,
    pub evidence_quote: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvent {
    pub kind: String,
    pub subject: String,
    pub trigger_at_ms: i64,
    #[serde(default)]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub follow_up: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOpenLoop {
    pub subject: String,
    pub category: String,
    pub emotional_weight: String,
    #[serde(default)]
    pub anchor_date_ms: Option<i64>,
    pub evidence_quote: String,
    pub follow_up_question: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResolution {
    pub subject: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePersonUpdate {
    #[serde(default)]
    pub current_concerns: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub last_mood_signal: Option<String>,
    #[serde(default)]
    pub curiosity_questions: Vec<String>,
}

pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// §4.F step 2's hard correctness gate: a quote must be non-empty, ≤200
/// chars, and a substring of the source text once both sides are
/// whitespace-normalized.
pub fn is_valid_evidence_quote(quote: &str, source_text: &str) -> bool {
    let normalized_quote = normalize_whitespace(quote);
    if normalized_quote.is_empty() || normalized_quote.chars().count() > 200 {
        return false;
    }
    normalize_whitespace(source_text).contains(&normalized_quote)
}

fn has_number_with_at_least_two_digits(text: &str) -> bool {
    let mut run = 0;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= 2 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn has_proper_noun(text: &str) -> bool {
    text.split_whitespace().any(|w| {
        let alpha: String = w.chars().filter(|c| c.is_alphabetic()).collect();
        alpha.chars().count() >= 3 && alpha.chars().next().is_some_and(|c| c.is_uppercase())
    })
}

/// §4.F step 3. Assumes the caller already confirmed the quote passes
/// `is_valid_evidence_quote` for facts that reach tiering.
pub fn tier_for_candidate(candidate: &CandidateFact, user_text: &str) -> ConfidenceTier {
    let quote = normalize_whitespace(&candidate.evidence_quote);
    let supported = is_valid_evidence_quote(&candidate.evidence_quote, user_text);
    let hedged = contains_hedging(&candidate.content) || contains_hedging(&candidate.evidence_quote);

    if quote.chars().count() < 10 || !supported || hedged {
        return ConfidenceTier::Low;
    }

    let strong_content = has_proper_noun(&candidate.content)
        || has_number_with_at_least_two_digits(&candidate.content)
        || candidate.content.contains('@');

    if quote.chars().count() >= 15 && supported && strong_content {
        return ConfidenceTier::High;
    }

    ConfidenceTier::Medium
}

/// Best-effort extraction of a JSON object from an LLM response that may
/// be wrapped in prose or a fenced code block.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&trimmed[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_quote_must_be_a_normalized_substring() {
        assert!(is_valid_evidence_quote("I am  vegetarian", "Yesterday I said: I am vegetarian now"));
        assert!(!is_valid_evidence_quote("", "anything"));
        assert!(!is_valid_evidence_quote("not present", "completely different text"));
    }

    #[test]
    fn evidence_quote_over_200_chars_is_rejected() {
        let long = "a".repeat(201);
        assert!(!is_valid_evidence_quote(&long, &long));
    }

    #[test]
    fn tiering_promotes_strong_evidence_to_high() {
        let candidate = CandidateFact {
            subject: "work".into(),
            content: "Works at Initech as of 2024".into(),
            category: "professional".into(),
            fact_type: "factual".into(),
            temporal_scope: "current".into(),
            evidence_quote: "I just started working at Initech".into(),
        };
        let text = "Yesterday I just started working at Initech, excited about it";
        assert_eq!(tier_for_candidate(&candidate, text), ConfidenceTier::High);
    }

    #[test]
    fn tiering_demotes_hedged_content_to_low() {
        let candidate = CandidateFact {
            subject: "mood".into(),
            content: "maybe moving to Berlin".into(),
            category: "plan".into(),
            fact_type: "belief".into(),
            temporal_scope: "future".into(),
            evidence_quote: "maybe moving to Berlin soon".into(),
        };
        let text = "maybe moving to Berlin soon, not sure yet";
        assert_eq!(tier_for_candidate(&candidate, text), ConfidenceTier::Low);
    }

    #[test]
    fn json_object_is_extracted_from_surrounding_prose() {
        let raw = "Sure, here you go:\n```json\n{\"facts\":[]}\n```\nlet me know if anything's off";
        assert_eq!(extract_json_object(raw), Some("{\"facts\":[]}"));
    }
}
