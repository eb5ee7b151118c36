//! `MemoryExtractor` — the two-stage extract/reconcile/verify pipeline of
//! §4.F end to end, orchestrating `vigil-memory` and `vigil-scheduler` the
//! way `skynet-agent`'s compaction pass orchestrates its own LLM call
//! against a single store: call the model, parse defensively, degrade to a
//! safe default on any failure, never let an LLM hiccup fail the turn.

use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_core::ids::ChatId;
use vigil_core::llm::{ChatMessage, CompletionRequest, LlmBackend, ModelRole};
use vigil_core::time::MonotonicMs;
use vigil_memory::manager::MemoryStore;
use vigil_memory::types::{Episode, FactCategory, FactType, TemporalScope};
use vigil_scheduler::engine::EventScheduler;
use vigil_scheduler::types::{EmotionalWeight, EventKind, OpenLoopCategory, OpenLoopStatus, Recurrence};

use crate::error::Result;
use crate::gates::should_skip_extraction;
use crate::reconcile::{lowercase_dedupe_fallback, reconcile_candidates, verify_candidates, ReconcileAction};
use crate::schema::{extract_json_object, tier_for_candidate, ExtractionOutput};
use crate::scheduling::{
    anticipated_follow_up_trigger, follow_up_trigger_for_category, is_in_event_window,
    is_in_follow_up_window, should_skip_follow_up,
};

const RECONCILE_CANDIDATE_POOL: usize = 30;

pub struct MemoryExtractor {
    memory: Arc<MemoryStore>,
    scheduler: Arc<EventScheduler>,
    llm: Arc<dyn LlmBackend>,
}

/// What happened when extracting a single episode — mostly useful for
/// tests and operator-facing tracing, since every outcome here already
/// degraded gracefully inside the pipeline.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub skipped: bool,
    pub facts_added: usize,
    pub facts_updated: usize,
    pub facts_deleted: usize,
    pub events_scheduled: usize,
    pub open_loops_touched: usize,
    pub open_loops_resolved: usize,
}

impl MemoryExtractor {
    pub fn new(memory: Arc<MemoryStore>, scheduler: Arc<EventScheduler>, llm: Arc<dyn LlmBackend>) -> Self {
        Self { memory, scheduler, llm }
    }

    /// §4.F end to end for one unextracted episode. Always marks the
    /// episode extracted on return, even when every step degraded to a
    /// no-op, so a stuck episode can never be retried forever.
    pub async fn extract_episode(
        &self,
        episode: &Episode,
        chat_id: &ChatId,
        is_group: bool,
        cancel: CancellationToken,
    ) -> Result<ExtractionSummary> {
        let mut summary = ExtractionSummary::default();
        let now = MonotonicMs::now();

        if should_skip_extraction(&episode.content) {
            summary.skipped = true;
            self.memory.mark_episode_extracted(episode.episode_id)?;
            return Ok(summary);
        }

        let Some(output) = self.call_extraction(&episode.content, cancel.clone()).await else {
            self.memory.mark_episode_extracted(episode.episode_id)?;
            return Ok(summary);
        };

        self.process_facts(&output, &episode.content, episode.person_id.as_ref(), &mut summary, cancel.clone())
            .await?;
        self.process_events(&output, chat_id, is_group, now, &mut summary)?;
        self.process_open_loops(&output, chat_id, now, &mut summary)?;
        self.process_resolutions(&output, chat_id, &mut summary)?;

        if let (Some(update), Some(person_id)) = (&output.person_update, episode.person_id.as_ref()) {
            let side_data = vigil_memory::types::PersonSideData {
                current_concerns: update.current_concerns.clone(),
                goals: update.goals.clone(),
                preferences: update.preferences.clone(),
                last_mood_signal: update.last_mood_signal.clone(),
                curiosity_questions: update.curiosity_questions.clone(),
            };
            self.memory.update_person_side_data(person_id, &side_data)?;
        }

        self.memory.mark_episode_extracted(episode.episode_id)?;
        Ok(summary)
    }

    /// §4.F step 2: the extraction call itself, with its hard
    /// evidence-quote gate applied before anything is returned to the
    /// caller. A parse failure or an invalid quote on every candidate
    /// degrades to `None`, not an error.
    async fn call_extraction(&self, user_text: &str, cancel: CancellationToken) -> Option<ExtractionOutput> {
        let prompt = format!(
            "Extract durable facts, future events, open commitments and resolutions to prior \
             open commitments from this message. Every fact/event/openLoop must carry an \
             \"evidenceQuote\" that is an exact, verbatim substring of the message (no \
             paraphrasing). Respond with JSON only, matching this shape: \
             {{\"facts\":[{{\"subject\":\"\",\"content\":\"\",\"category\":\"\",\"factType\":\"\",\
             \"temporalScope\":\"\",\"evidenceQuote\":\"\"}}],\"events\":[{{\"kind\":\"\",\
             \"subject\":\"\",\"triggerAtMs\":0,\"recurrence\":null,\"followUp\":false}}],\
             \"openLoops\":[{{\"subject\":\"\",\"category\":\"\",\"emotionalWeight\":\"\",\
             \"anchorDateMs\":null,\"evidenceQuote\":\"\",\"followUpQuestion\":\"\"}}],\
             \"resolutions\":[{{\"subject\":\"\",\"confidence\":0.0}}],\"personUpdate\":null}}\n\n\
             Message:\n{user_text}"
        );

        let response = vigil_concurrency::complete_with_retries(
            self.llm.as_ref(),
            CompletionRequest {
                role: ModelRole::Fast,
                messages: vec![ChatMessage { role: "user".to_string(), content: prompt }],
                max_steps: 2,
            },
            cancel,
        )
        .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                warn!(%err, "extraction call failed, skipping");
                return None;
            }
        };

        let json = extract_json_object(&response.text)?;
        let mut output: ExtractionOutput = match serde_json::from_str(json) {
            Ok(o) => o,
            Err(err) => {
                warn!(%err, "extraction output failed to parse, skipping");
                return None;
            }
        };

        output.facts.retain(|f| crate::schema::is_valid_evidence_quote(&f.evidence_quote, user_text));
        output.events.retain(|_| true);
        output
            .open_loops
            .retain(|o| crate::schema::is_valid_evidence_quote(&o.evidence_quote, user_text));

        Some(output)
    }

    /// §4.F steps 3-5: tier, reconcile against up to 30 existing facts (or
    /// verify-then-insert when there's nothing to reconcile against), and
    /// apply the resulting add/update/delete actions.
    async fn process_facts(
        &self,
        output: &ExtractionOutput,
        user_text: &str,
        person_id: Option<&vigil_core::ids::PersonId>,
        summary: &mut ExtractionSummary,
        cancel: CancellationToken,
    ) -> Result<()> {
        if output.facts.is_empty() {
            return Ok(());
        }

        let existing = self
            .memory
            .hybrid_search_facts(user_text, person_id, RECONCILE_CANDIDATE_POOL)
            .await?
            .into_iter()
            .map(|(fact, _)| fact)
            .collect::<Vec<_>>();

        if existing.is_empty() {
            let verdicts = verify_candidates(&self.llm, &output.facts, user_text, cancel.clone()).await;
            let novel_indices = lowercase_dedupe_fallback(&output.facts, &existing);
            for idx in novel_indices {
                if !verdicts.get(idx).copied().unwrap_or(true) {
                    continue;
                }
                self.insert_fact(&output.facts[idx], user_text, person_id)?;
                summary.facts_added += 1;
            }
            return Ok(());
        }

        let actions = reconcile_candidates(&self.llm, &output.facts, &existing, cancel).await;
        let actions = match actions {
            Some(a) => a,
            None => {
                let novel_indices = lowercase_dedupe_fallback(&output.facts, &existing);
                for idx in novel_indices {
                    self.insert_fact(&output.facts[idx], user_text, person_id)?;
                    summary.facts_added += 1;
                }
                return Ok(());
            }
        };

        for (idx, action) in actions.into_iter().enumerate() {
            match action {
                ReconcileAction::Add => {
                    self.insert_fact(&output.facts[idx], user_text, person_id)?;
                    summary.facts_added += 1;
                }
                ReconcileAction::Update(existing_idx) => {
                    self.memory.update_fact_content(existing[existing_idx].fact_id, &output.facts[idx].content)?;
                    summary.facts_updated += 1;
                }
                ReconcileAction::Delete(existing_idx) => {
                    self.memory.set_fact_current(existing[existing_idx].fact_id, false)?;
                    summary.facts_deleted += 1;
                }
                ReconcileAction::None => {}
            }
        }
        Ok(())
    }

    fn insert_fact(
        &self,
        candidate: &crate::schema::CandidateFact,
        user_text: &str,
        person_id: Option<&vigil_core::ids::PersonId>,
    ) -> Result<()> {
        let category = FactCategory::from_str(&candidate.category).unwrap_or(FactCategory::Misc);
        let fact_type = FactType::from_str(&candidate.fact_type).unwrap_or(FactType::Factual);
        let temporal_scope = TemporalScope::from_str(&candidate.temporal_scope).unwrap_or(TemporalScope::Unknown);
        let tier = tier_for_candidate(candidate, user_text);
        self.memory.store_fact(
            person_id,
            &candidate.subject,
            &candidate.content,
            category,
            fact_type,
            temporal_scope,
            &candidate.evidence_quote,
            tier,
        )?;
        Ok(())
    }

    /// §4.F step 6.
    fn process_events(
        &self,
        output: &ExtractionOutput,
        chat_id: &ChatId,
        is_group: bool,
        now: MonotonicMs,
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        for candidate in &output.events {
            let kind = match candidate.kind.as_str() {
                "reminder" => EventKind::Reminder,
                "birthday" => EventKind::Birthday,
                "check_in" => EventKind::CheckIn,
                "anticipated" => EventKind::Anticipated,
                other => {
                    warn!(kind = other, "unknown event kind in extraction output, skipping");
                    continue;
                }
            };

            if is_group && matches!(kind, EventKind::Reminder | EventKind::Birthday) {
                continue;
            }

            let trigger_at_ms = MonotonicMs::from(candidate.trigger_at_ms);
            if !is_in_event_window(trigger_at_ms, now) {
                continue;
            }

            let recurrence = candidate.recurrence.as_deref().and_then(|r| Recurrence::from_str(r).ok());
            let event_id = self.scheduler.add_event(kind, &candidate.subject, chat_id, trigger_at_ms, recurrence, now)?;
            summary.events_scheduled += 1;
            info!(%event_id, kind = %kind, "scheduled event from extraction");

            if matches!(kind, EventKind::Anticipated) && candidate.follow_up {
                let follow_up_at = anticipated_follow_up_trigger(trigger_at_ms);
                if is_in_event_window(follow_up_at, now) {
                    self.scheduler.add_event(
                        EventKind::FollowUp,
                        &candidate.subject,
                        chat_id,
                        follow_up_at,
                        None,
                        now,
                    )?;
                    summary.events_scheduled += 1;
                }
            }
        }
        Ok(())
    }

    /// §4.F step 7: new/bumped open loops, with category-based follow-up
    /// scheduling unless the loop is a lightly-mentioned social commitment.
    fn process_open_loops(
        &self,
        output: &ExtractionOutput,
        chat_id: &ChatId,
        now: MonotonicMs,
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        for candidate in &output.open_loops {
            let Ok(category) = OpenLoopCategory::from_str(&candidate.category) else {
                warn!(category = %candidate.category, "unknown open loop category, skipping");
                continue;
            };
            let weight = EmotionalWeight::from_str(&candidate.emotional_weight).unwrap_or(EmotionalWeight::Medium);
            let subject_key = vigil_scheduler::types::normalize_subject_key(&candidate.subject);
            let anchor_date_ms = candidate.anchor_date_ms.map(MonotonicMs::from);

            self.scheduler.upsert_open_loop(
                chat_id,
                &subject_key,
                &candidate.subject,
                category,
                weight,
                anchor_date_ms,
                &candidate.evidence_quote,
                &candidate.follow_up_question,
            )?;
            summary.open_loops_touched += 1;

            let mention_count = self
                .scheduler
                .list_open_loops_for_chat(chat_id, OpenLoopStatus::Open)?
                .into_iter()
                .find(|l| l.subject_key == subject_key)
                .map(|l| l.mention_count)
                .unwrap_or(1);

            if should_skip_follow_up(category, weight, mention_count) {
                continue;
            }

            let Some(trigger_at_ms) = follow_up_trigger_for_category(category, weight, anchor_date_ms, now) else {
                continue;
            };
            if !is_in_follow_up_window(trigger_at_ms, now) {
                continue;
            }

            let event_id = self.scheduler.add_event(
                EventKind::FollowUp,
                &candidate.follow_up_question,
                chat_id,
                trigger_at_ms,
                None,
                now,
            )?;
            self.scheduler.attach_follow_up_event_to_open_loop(chat_id, &subject_key, &event_id)?;
        }
        Ok(())
    }

    /// §4.F step 7: a resolution at confidence >= 0.7 resolves the open
    /// loop and withdraws its attached follow-up event.
    fn process_resolutions(
        &self,
        output: &ExtractionOutput,
        chat_id: &ChatId,
        summary: &mut ExtractionSummary,
    ) -> Result<()> {
        for resolution in &output.resolutions {
            if resolution.confidence < 0.7 {
                continue;
            }
            let subject_key = vigil_scheduler::types::normalize_subject_key(&resolution.subject);
            if let Some(event_id) = self.scheduler.resolve_open_loop(chat_id, &subject_key)? {
                self.scheduler.cancel_event(&event_id)?;
            }
            summary.open_loops_resolved += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use vigil_core::config::MemoryConfig;
    use vigil_core::error::LlmError;
    use vigil_memory::mirror::NullMirrorSink;

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

    fn memory_store() -> Arc<MemoryStore> {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        Arc::new(
            MemoryStore::new(conn, MemoryConfig::default(), None, Arc::new(NullMirrorSink)).unwrap(),
        )
    }

    fn scheduler() -> Arc<EventScheduler> {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        Arc::new(EventScheduler::new(conn).unwrap())
    }

    #[tokio::test]
    async fn skipped_turn_still_marks_episode_extracted() {
        let memory = memory_store();
        let scheduler = scheduler();
        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm(String::new()));
        let extractor = MemoryExtractor::new(memory.clone(), scheduler, llm);

        let chat_id = ChatId::from("telegram:1");
        let episode_id = memory.log_episode(&chat_id, None, false, "gm").unwrap();
        let episode = Episode {
            episode_id,
            chat_id: chat_id.clone(),
            person_id: None,
            is_group: false,
            content: "gm".to_string(),
            last_extracted_at_ms: None,
            created_at_ms: MonotonicMs::now(),
        };

        let summary = extractor
            .extract_episode(&episode, &chat_id, false, CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.skipped);
        assert!(memory.list_unextracted_episodes(&chat_id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_extraction_output_degrades_to_noop() {
        let memory = memory_store();
        let scheduler = scheduler();
        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm("not json at all".to_string()));
        let extractor = MemoryExtractor::new(memory.clone(), scheduler, llm);

        let chat_id = ChatId::from("telegram:1");
        let episode_id = memory
            .log_episode(&chat_id, None, false, "I just started working at Initech")
            .unwrap();
        let episode = Episode {
            episode_id,
            chat_id: chat_id.clone(),
            person_id: None,
            is_group: false,
            content: "I just started working at Initech".to_string(),
            last_extracted_at_ms: None,
            created_at_ms: MonotonicMs::now(),
        };

        let summary = extractor
            .extract_episode(&episode, &chat_id, false, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.facts_added, 0);
        assert!(memory.list_unextracted_episodes(&chat_id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn valid_extraction_inserts_a_fact_with_matching_evidence() {
        let memory = memory_store();
        let scheduler = scheduler();
        let text = "I just started working at Initech as a developer";
        let json = serde_json::json!({
            "facts": [{
                "subject": "work",
                "content": "Works at Initech as a developer",
                "category": "professional",
                "factType": "factual",
                "temporalScope": "current",
                "evidenceQuote": "I just started working at Initech"
            }],
            "events": [],
            "openLoops": [],
            "resolutions": [],
            "personUpdate": null
        })
        .to_string();
        let llm: Arc<dyn LlmBackend> = Arc::new(ScriptedLlm(json));
        let extractor = MemoryExtractor::new(memory.clone(), scheduler, llm);

        let chat_id = ChatId::from("telegram:1");
        let episode_id = memory.log_episode(&chat_id, None, false, text).unwrap();
        let episode = Episode {
            episode_id,
            chat_id: chat_id.clone(),
            person_id: None,
            is_group: false,
            content: text.to_string(),
            last_extracted_at_ms: None,
            created_at_ms: MonotonicMs::now(),
        };

        let summary = extractor
            .extract_episode(&episode, &chat_id, false, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.facts_added, 1);
    }
}
