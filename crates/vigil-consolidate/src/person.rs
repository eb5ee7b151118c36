//! Person capsule refresh (§4.G step 4): prune stale structured fields,
//! dedupe and retire contradicting facts, then synthesize a fresh capsule.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use vigil_core::ids::PersonId;
use vigil_core::llm::{ChatMessage, CompletionRequest, LlmBackend, ModelRole};
use vigil_core::time::MonotonicMs;
use vigil_memory::manager::MemoryStore;
use vigil_memory::types::{Fact, Person, PersonSideData};

use crate::error::Result;
use crate::text::{contradiction_key_for, mentioned_in, token_jaccard};

const DM_WINDOW_MS: i64 = 14 * 24 * 60 * 60 * 1_000;
const JACCARD_DEDUPE_THRESHOLD: f64 = 0.85;
const EPISODE_SAMPLE_LIMIT: usize = 200;

/// Drops concerns/goals from `side_data` that aren't mentioned anywhere in
/// `dm_episodes` (a word-token overlap test, not exact match). Preferences
/// and mood signal are left untouched — only growable lists get pruned.
pub fn prune_side_data(side_data: &PersonSideData, dm_episodes: &[String]) -> PersonSideData {
    PersonSideData {
        current_concerns: side_data
            .current_concerns
            .iter()
            .filter(|c| mentioned_in(c, dm_episodes))
            .cloned()
            .collect(),
        goals: side_data.goals.iter().filter(|g| mentioned_in(g, dm_episodes)).cloned().collect(),
        preferences: side_data.preferences.clone(),
        last_mood_signal: side_data.last_mood_signal.clone(),
        curiosity_questions: side_data.curiosity_questions.clone(),
    }
}

/// Facts to retire (`setFactCurrent(false)`) as duplicates or superseded
/// contradictions. `facts` must be ordered oldest-first so "keep the
/// newest" is simply "keep the last one seen".
pub fn facts_to_retire(facts: &[Fact]) -> Vec<vigil_core::ids::FactId> {
    let mut retire = Vec::new();

    for category in [
        vigil_memory::types::FactCategory::Preference,
        vigil_memory::types::FactCategory::Personal,
        vigil_memory::types::FactCategory::Plan,
        vigil_memory::types::FactCategory::Professional,
        vigil_memory::types::FactCategory::Relationship,
        vigil_memory::types::FactCategory::Misc,
    ] {
        let mut kept: Vec<&Fact> = Vec::new();
        for fact in facts.iter().filter(|f| f.category == category) {
            if let Some(dup) = kept.iter().position(|k| token_jaccard(&k.content, &fact.content) >= JACCARD_DEDUPE_THRESHOLD) {
                retire.push(kept[dup].fact_id);
                kept[dup] = fact;
            } else {
                kept.push(fact);
            }
        }
    }

    let mut by_key: std::collections::BTreeMap<crate::text::ContradictionKey, &Fact> = std::collections::BTreeMap::new();
    for fact in facts {
        if retire.contains(&fact.fact_id) {
            continue;
        }
        let Some(key) = contradiction_key_for(&fact.content) else {
            continue;
        };
        if let Some(existing) = by_key.insert(key, fact) {
            retire.push(existing.fact_id);
        }
    }

    retire
}

async fn synthesize_person_capsule(
    llm: &Arc<dyn LlmBackend>,
    role: ModelRole,
    person: &Person,
    facts: &[Fact],
    cancel: CancellationToken,
) -> Option<String> {
    if facts.is_empty() {
        return None;
    }
    let facts_text = facts.iter().map(|f| f.content.as_str()).collect::<Vec<_>>().join("\n");
    let response = vigil_concurrency::complete_with_retries(
        llm.as_ref(),
        CompletionRequest {
            role,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: format!(
                    "Write a compact identity capsule (2-5 plain-text sentences) for {} from these facts:\n{facts_text}",
                    person.display_name
                ),
            }],
            max_steps: 1,
        },
        cancel,
    )
    .await;

    match response {
        Ok(r) if !r.text.trim().is_empty() => Some(r.text.trim().to_string()),
        Ok(_) => None,
        Err(err) => {
            warn!(%err, person_id = %person.person_id, "person capsule synthesis failed");
            None
        }
    }
}

/// Runs prune + dedupe/contradiction-retirement + synthesis for one
/// person. A capsule that fails to synthesize leaves the existing capsule
/// untouched but still applies the prune/retire side effects, since those
/// are independently valuable and shouldn't be held hostage by an LLM
/// hiccup.
pub async fn refresh_person_capsule(
    memory: &Arc<MemoryStore>,
    llm: &Arc<dyn LlmBackend>,
    role: ModelRole,
    person_id: &PersonId,
    cancel: CancellationToken,
) -> Result<()> {
    let Some(person) = memory.get_person(person_id)? else {
        return Ok(());
    };

    let since = MonotonicMs::now().minus_ms(DM_WINDOW_MS);
    let dm_episodes: Vec<String> = memory
        .list_recent_dm_episodes_for_person(person_id, since, EPISODE_SAMPLE_LIMIT)?
        .into_iter()
        .map(|e| e.content)
        .collect();
    let pruned = prune_side_data(&person.side_data, &dm_episodes);
    memory.replace_person_side_data(person_id, &pruned)?;

    let facts = memory.list_current_facts_for_person(person_id)?;
    for fact_id in facts_to_retire(&facts) {
        memory.set_fact_current(fact_id, false)?;
    }

    let facts = memory.list_current_facts_for_person(person_id)?;
    if let Some(capsule) = synthesize_person_capsule(llm, role, &person, &facts, cancel).await {
        memory.set_person_capsule(person_id, &capsule)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_memory::types::{ConfidenceTier, FactCategory, FactType, TemporalScope};

    fn fact(id: i64, category: FactCategory, content: &str, created_at_ms: i64) -> Fact {
        Fact {
            fact_id: vigil_core::ids::FactId(id),
            person_id: None,
            subject: "x".into(),
            content: content.into(),
            category,
            fact_type: FactType::Factual,
            temporal_scope: TemporalScope::Current,
            evidence_quote: "\"q\"".into(),
            confidence_tier: ConfidenceTier::Medium,
            is_current: true,
            last_accessed_at_ms: MonotonicMs(0),
            created_at_ms: MonotonicMs(created_at_ms),
        }
    }

    #[test]
    fn prune_drops_concerns_not_mentioned_recently() {
        let side_data = PersonSideData {
            current_concerns: vec!["worried about the exam".into(), "stressed about rent".into()],
            goals: vec!["learn spanish".into()],
            preferences: Default::default(),
            last_mood_signal: None,
            curiosity_questions: vec![],
        };
        let episodes = vec!["still nervous about the exam tomorrow".to_string()];
        let pruned = prune_side_data(&side_data, &episodes);
        assert_eq!(pruned.current_concerns, vec!["worried about the exam".to_string()]);
        assert!(pruned.goals.is_empty());
    }

    #[test]
    fn near_duplicate_facts_in_the_same_category_are_deduped_keeping_the_newest() {
        let facts = vec![
            fact(1, FactCategory::Personal, "enjoys hiking on weekends", 100),
            fact(2, FactCategory::Personal, "enjoys hiking most weekends", 200),
        ];
        let retire = facts_to_retire(&facts);
        assert_eq!(retire, vec![vigil_core::ids::FactId(1)]);
    }

    #[test]
    fn contradicting_works_at_facts_keep_only_the_newest() {
        let facts = vec![
            fact(1, FactCategory::Professional, "Works at Initech", 100),
            fact(2, FactCategory::Professional, "Now works at Globex", 200),
        ];
        let retire = facts_to_retire(&facts);
        assert_eq!(retire, vec![vigil_core::ids::FactId(1)]);
    }

    #[test]
    fn unrelated_facts_are_left_alone() {
        let facts = vec![
            fact(1, FactCategory::Misc, "plays the guitar", 100),
            fact(2, FactCategory::Misc, "collects vinyl records", 200),
        ];
        assert!(facts_to_retire(&facts).is_empty());
    }
}
