//! Reconciliation against existing facts (§4.F steps 4-5): an optional
//! verification pass when no prior facts exist, and an LLM-driven
//! add/update/delete/none reconciliation when they do — with a hard
//! guardrail against the reconciler inventing content that was never in
//! the candidate set.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vigil_core::llm::{ChatMessage, CompletionRequest, LlmBackend, ModelRole};
use vigil_memory::types::Fact;

use crate::schema::{extract_json_object, normalize_whitespace, CandidateFact};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    Add,
    Update(usize),
    Delete(usize),
    None,
}

#[derive(Debug, Deserialize)]
struct VerificationOutput {
    #[serde(default)]
    verdicts: Vec<VerificationVerdict>,
}

#[derive(Debug, Deserialize)]
struct VerificationVerdict {
    candidate_idx: usize,
    supported: bool,
}

#[derive(Debug, Deserialize)]
struct ReconcileOutput {
    #[serde(default)]
    actions: Vec<ReconcileEntry>,
}

#[derive(Debug, Deserialize)]
struct ReconcileEntry {
    candidate_idx: usize,
    action: String,
    #[serde(default)]
    existing_idx: Option<usize>,
    #[serde(default)]
    content: Option<String>,
}

/// §4.F step 4: only called when no prior facts exist and there are ≥2
/// candidates. Any failure to call or parse is treated as "all supported"
/// — verification is purely a filter, never a source of new failures.
pub async fn verify_candidates(
    llm: &Arc<dyn LlmBackend>,
    candidates: &[CandidateFact],
    user_text: &str,
    cancel: CancellationToken,
) -> Vec<bool> {
    let all_supported = vec![true; candidates.len()];
    if candidates.len() < 2 {
        return all_supported;
    }

    let prompt = format!(
        "Source text:\n{user_text}\n\nCandidate facts (JSON):\n{}\n\n\
         For each candidate, decide whether the source text actually supports it. \
         Respond with JSON only: {{\"verdicts\":[{{\"candidateIdx\":0,\"supported\":true}}, ...]}}",
        serde_json::to_string(candidates).unwrap_or_default(),
    );

    let response = vigil_concurrency::complete_with_retries(
        llm.as_ref(),
        CompletionRequest {
            role: ModelRole::Fast,
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt }],
            max_steps: 1,
        },
        cancel,
    )
    .await;

    let Ok(response) = response else {
        return all_supported;
    };
    let Some(json) = extract_json_object(&response.text) else {
        return all_supported;
    };
    let Ok(parsed) = serde_json::from_str::<VerificationOutput>(json) else {
        return all_supported;
    };

    let mut verdicts = all_supported;
    for v in parsed.verdicts {
        if let Some(slot) = verdicts.get_mut(v.candidate_idx) {
            *slot = v.supported;
        }
    }
    verdicts
}

/// §4.F step 5: `None` signals a reconciliation parse failure — the
/// caller falls back to lowercase-dedupe insertion.
pub async fn reconcile_candidates(
    llm: &Arc<dyn LlmBackend>,
    candidates: &[CandidateFact],
    existing: &[Fact],
    cancel: CancellationToken,
) -> Option<Vec<ReconcileAction>> {
    let prompt = format!(
        "Existing facts (JSON):\n{}\n\nCandidate facts (JSON):\n{}\n\n\
         For each candidate, decide one action: \"add\" (it's new), \
         \"update\" (it supersedes an existing fact — set existingIdx), \
         \"delete\" (an existing fact is now false — set existingIdx), or \
         \"none\" (redundant, skip). For add/update, echo back the \
         candidate's own content verbatim in \"content\" — never invent new text. \
         Respond with JSON only: {{\"actions\":[{{\"candidateIdx\":0,\"action\":\"add\",\"existingIdx\":null,\"content\":\"...\"}}]}}",
        serde_json::to_string(existing.iter().map(|f| &f.content).collect::<Vec<_>>().as_slice())
            .unwrap_or_default(),
        serde_json::to_string(candidates).unwrap_or_default(),
    );

    let response = vigil_concurrency::complete_with_retries(
        llm.as_ref(),
        CompletionRequest {
            role: ModelRole::Fast,
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt }],
            max_steps: 1,
        },
        cancel,
    )
    .await
    .ok()?;

    let json = extract_json_object(&response.text)?;
    let parsed: ReconcileOutput = serde_json::from_str(json).ok()?;

    let mut actions = vec![ReconcileAction::None; candidates.len()];
    for entry in parsed.actions {
        let Some(candidate) = candidates.get(entry.candidate_idx) else {
            continue;
        };
        let action = match entry.action.as_str() {
            "add" | "update" => {
                let Some(content) = &entry.content else {
                    warn!(candidate_idx = entry.candidate_idx, "reconciler add/update missing content, dropping");
                    continue;
                };
                if normalize_whitespace(content) != normalize_whitespace(&candidate.content) {
                    warn!(
                        candidate_idx = entry.candidate_idx,
                        "reconciler content not in candidate set, dropping hallucinated action"
                    );
                    continue;
                }
                if entry.action == "add" {
                    ReconcileAction::Add
                } else {
                    match entry.existing_idx {
                        Some(idx) if idx < existing.len() => ReconcileAction::Update(idx),
                        _ => continue,
                    }
                }
            }
            "delete" => match entry.existing_idx {
                Some(idx) if idx < existing.len() => ReconcileAction::Delete(idx),
                _ => continue,
            },
            _ => ReconcileAction::None,
        };
        if let Some(slot) = actions.get_mut(entry.candidate_idx) {
            *slot = action;
        }
    }
    Some(actions)
}

/// §4.F step 5 fallback when the reconciler's JSON doesn't parse: dedupe
/// candidates against each other and against existing facts by lowercase
/// content, returning the indices of genuinely novel candidates.
pub fn lowercase_dedupe_fallback(candidates: &[CandidateFact], existing: &[Fact]) -> Vec<usize> {
    let existing_lower: Vec<String> = existing.iter().map(|f| f.content.to_lowercase()).collect();
    let mut seen: Vec<String> = Vec::new();
    let mut novel = Vec::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        let lower = candidate.content.to_lowercase();
        if existing_lower.contains(&lower) || seen.contains(&lower) {
            continue;
        }
        seen.push(lower);
        novel.push(idx);
    }
    novel
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::error::LlmError;
    use vigil_memory::types::{ConfidenceTier, FactCategory, FactType, TemporalScope};
    use vigil_core::time::MonotonicMs;

    fn candidate(content: &str) -> CandidateFact {
        CandidateFact {
            subject: "x".into(),
            content: content.into(),
            category: "misc".into(),
            fact_type: "factual".into(),
            temporal_scope: "current".into(),
            evidence_quote: "\"quote\"".into(),
        }
    }

    fn fact(id: i64, content: &str) -> Fact {
        Fact {
            fact_id: vigil_core::ids::FactId(id),
            person_id: None,
            subject: "x".into(),
            content: content.into(),
            category: FactCategory::Misc,
            fact_type: FactType::Factual,
            temporal_scope: TemporalScope::Current,
            evidence_quote: "\"quote\"".into(),
            confidence_tier: ConfidenceTier::Medium,
            is_current: true,
            last_accessed_at_ms: MonotonicMs(0),
            created_at_ms: MonotonicMs(0),
        }
    }

    struct FailingLlm;
    #[async_trait::async_trait]
    impl LlmBackend for FailingLlm {
        async fn complete(
            &self,
            _req: CompletionRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<vigil_core::llm::CompletionResponse, LlmError> {
            Err(LlmError::Transient("down".into()))
        }
    }

    #[tokio::test]
    async fn verification_defaults_to_supported_on_llm_failure() {
        let llm: Arc<dyn LlmBackend> = Arc::new(FailingLlm);
        let candidates = vec![candidate("a"), candidate("b")];
        let verdicts = verify_candidates(&llm, &candidates, "source", CancellationToken::new()).await;
        assert_eq!(verdicts, vec![true, true]);
    }

    #[tokio::test]
    async fn reconcile_falls_back_to_none_on_llm_failure() {
        let llm: Arc<dyn LlmBackend> = Arc::new(FailingLlm);
        let candidates = vec![candidate("a")];
        let existing = vec![fact(1, "b")];
        let result = reconcile_candidates(&llm, &candidates, &existing, CancellationToken::new()).await;
        assert!(result.is_none());
    }

    #[test]
    fn lowercase_dedupe_drops_existing_and_internal_duplicates() {
        let candidates = vec![candidate("Vegetarian"), candidate("vegetarian"), candidate("Plays chess")];
        let existing = vec![fact(1, "vegetarian")];
        let novel = lowercase_dedupe_fallback(&candidates, &existing);
        assert_eq!(novel, vec![2]);
    }
}
