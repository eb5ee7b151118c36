//! Group capsule and public-style digest synthesis (§4.G steps 1-2): a
//! single cheap LLM call per dirty entry, summarizing recent episodes into
//! a short plain-text digest. Grounded on the same call-and-degrade shape
//! `vigil-extractor`'s extraction call uses, minus the JSON schema — these
//! digests are freeform text, not structured data.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use vigil_core::llm::{ChatMessage, CompletionRequest, LlmBackend, ModelRole};
use vigil_memory::types::Episode;

async fn synthesize(
    llm: &Arc<dyn LlmBackend>,
    role: ModelRole,
    instructions: &str,
    episodes: &[Episode],
    cancel: CancellationToken,
) -> Option<String> {
    if episodes.is_empty() {
        return None;
    }
    let transcript = episodes
        .iter()
        .rev()
        .map(|e| e.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let response = vigil_concurrency::complete_with_retries(
        llm.as_ref(),
        CompletionRequest {
            role,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: format!("{instructions}\n\nRecent conversation:\n{transcript}"),
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
            warn!(%err, "capsule synthesis call failed");
            None
        }
    }
}

/// §4.G step 1: a 2-5 sentence plain-text digest of a group's last 7 days.
pub async fn synthesize_group_capsule(
    llm: &Arc<dyn LlmBackend>,
    role: ModelRole,
    episodes: &[Episode],
    cancel: CancellationToken,
) -> Option<String> {
    synthesize(
        llm,
        role,
        "Summarize this group chat's recent norms and running themes in 2-5 plain-text sentences. \
         No bullet points, no preamble.",
        episodes,
        cancel,
    )
    .await
}

/// §4.G step 2: a cross-group-safe tone digest over 14 days — must never
/// mention specifics that would be inappropriate to surface in a different
/// group the same person is in.
pub async fn synthesize_public_style_capsule(
    llm: &Arc<dyn LlmBackend>,
    role: ModelRole,
    episodes: &[Episode],
    cancel: CancellationToken,
) -> Option<String> {
    synthesize(
        llm,
        role,
        "Summarize this person's conversational tone and style in 2-5 plain-text sentences, safe to \
         share across any group they're in. Do not mention specific facts, names, or topics — only \
         tone (e.g. formal/casual, terse/chatty, typical emoji use).",
        episodes,
        cancel,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::error::LlmError;
    use vigil_core::ids::{ChatId, EpisodeId};
    use vigil_core::time::MonotonicMs;

    struct ScriptedLlm(String);
    #[async_trait::async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn complete(
            &self,
            _req: CompletionRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<vigil_core::llm::CompletionResponse, LlmError> {
            Ok(vigil_core::llm::CompletionResponse { text: self.0.clone() })
        }
    }

    fn episode(content: &str) -> Episode {
        Episode {
            episode_id: EpisodeId(1),
            chat_id: ChatId::from("telegram:-1"),
            person_id: None,
            is_group: true,
            content: content.to_string(),
            last_extracted_at_ms: None,
            created_at_ms: MonotonicMs::now(),
        }
    }

    #[tokio::test]
    async fn empty_episode_list_yields_no_capsule() {
        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm("digest".to_string()));
        let result = synthesize_group_capsule(&llm, ModelRole::Fast, &[], CancellationToken::new()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn non_empty_response_is_trimmed_and_returned() {
        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm("  a relaxed, joke-heavy group  \n".to_string()));
        let result = synthesize_group_capsule(&llm, ModelRole::Fast, &[episode("USER: lol")], CancellationToken::new()).await;
        assert_eq!(result.as_deref(), Some("a relaxed, joke-heavy group"));
    }
}
