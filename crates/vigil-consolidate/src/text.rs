//! Token-overlap helpers for the person-capsule refresh (§4.G step 4):
//! pruning stale structured fields and deduping near-identical facts.

use std::collections::BTreeSet;

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard similarity between the token sets of `a` and `b`, in `[0, 1]`.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Whether `item` shares at least one token with any episode in `corpus` —
/// the "still mentioned in the last 14 days" test for pruning a person's
/// stale concerns/goals.
pub fn mentioned_in(item: &str, corpus: &[String]) -> bool {
    let item_tokens = tokenize(item);
    if item_tokens.is_empty() {
        return false;
    }
    corpus.iter().any(|episode| {
        let episode_tokens = tokenize(episode);
        item_tokens.intersection(&episode_tokens).count() > 0
    })
}

/// §4.G step 4's contradiction keys: a content string implies at most one
/// value per key, so only the newest fact carrying the key should survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContradictionKey {
    WorksAt,
    LivesIn,
}

const WORKS_AT_CUES: &[&str] = &["works at", "working at", "employed at", "works for"];
const LIVES_IN_CUES: &[&str] = &["lives in", "living in", "moved to", "based in"];

/// Best-effort regex-free cue match against fact content; `None` when the
/// content doesn't touch a known contradiction key.
pub fn contradiction_key_for(content: &str) -> Option<ContradictionKey> {
    let lower = content.to_lowercase();
    if WORKS_AT_CUES.iter().any(|cue| lower.contains(cue)) {
        return Some(ContradictionKey::WorksAt);
    }
    if LIVES_IN_CUES.iter().any(|cue| lower.contains(cue)) {
        return Some(ContradictionKey::LivesIn);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_of_identical_text_is_one() {
        assert_eq!(token_jaccard("I like pizza", "i like pizza"), 1.0);
    }

    #[test]
    fn jaccard_of_disjoint_text_is_zero() {
        assert_eq!(token_jaccard("red car", "blue bicycle"), 0.0);
    }

    #[test]
    fn mentioned_in_matches_on_shared_token() {
        let corpus = vec!["we talked about the berlin move again".to_string()];
        assert!(mentioned_in("moving to Berlin", &corpus));
        assert!(!mentioned_in("learning french", &corpus));
    }

    #[test]
    fn contradiction_key_recognizes_works_at_and_lives_in() {
        assert_eq!(contradiction_key_for("Now working at Globex"), Some(ContradictionKey::WorksAt));
        assert_eq!(contradiction_key_for("Moved to Lisbon last spring"), Some(ContradictionKey::LivesIn));
        assert_eq!(contradiction_key_for("Likes jazz"), None);
    }
}
