//! `MemoryStore` — the full CRUD, retrieval and dirty-queue surface over
//! the schema in `db.rs`. Wraps the connection in a `Mutex` the same way
//! the teacher's `MemoryManager` does, since `rusqlite::Connection` is
//! `!Sync`; FTS5 external-content sync on write follows the same
//! delete-then-reinsert shape as `skynet-memory/src/manager.rs::learn`.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use vigil_core::config::MemoryConfig;
use vigil_core::ids::{ChannelUserId, ChatId, EpisodeId, FactId, LessonId, PersonId};
use vigil_core::llm::Embedder;
use vigil_core::time::MonotonicMs;

use crate::db;
use crate::error::{MemoryError, Result};
use crate::mirror::MirrorSink;
use crate::retrieval;
use crate::types::{
    ConfidenceTier, Episode, Fact, FactCategory, FactType, GroupCapsule, Lesson,
    ObservationCounters, Person, PersonSideData, TemporalScope, TrustTier,
};

/// A dirty-queue entry claimed for processing. `first_dirty_at_ms` is the
/// value observed at claim time; `complete_*` re-checks it to detect
/// whether the entity was marked dirty again while the claim was held.
#[derive(Debug, Clone)]
pub struct DirtyClaim<K> {
    pub key: K,
    pub first_dirty_at_ms: MonotonicMs,
}

pub struct MemoryStore {
    conn: Mutex<Connection>,
    cfg: MemoryConfig,
    embedder: Option<Arc<dyn Embedder>>,
    mirror: Arc<dyn MirrorSink>,
}

impl MemoryStore {
    pub fn new(
        mut conn: Connection,
        cfg: MemoryConfig,
        embedder: Option<Arc<dyn Embedder>>,
        mirror: Arc<dyn MirrorSink>,
    ) -> Result<Self> {
        db::init_db(&mut conn)?;
        if let Some(e) = &embedder {
            db::ensure_vector_tables(&conn, e.dims())?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            cfg,
            embedder,
            mirror,
        })
    }

    // ---------------------------------------------------------------- people

    /// Upsert-by-`(channel, channel_user_id)`: returns the existing Person
    /// unchanged, or mints and inserts a new one.
    pub fn track_person(
        &self,
        channel: &str,
        channel_user_id: &ChannelUserId,
        display_name: &str,
    ) -> Result<Person> {
        if let Some(existing) = self.get_person_by_channel_id(channel, channel_user_id)? {
            return Ok(existing);
        }
        let conn = self.conn.lock().unwrap();
        let person_id = PersonId::new();
        let now = MonotonicMs::now();
        let side_data = PersonSideData::default();
        conn.execute(
            "INSERT INTO people (person_id, display_name, channel, channel_user_id,
             relationship_score, side_data_json, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)",
            params![
                person_id.as_str(),
                display_name,
                channel,
                channel_user_id.as_str(),
                serde_json::to_string(&side_data)?,
                now.as_i64(),
            ],
        )?;
        Ok(Person {
            person_id,
            display_name: display_name.to_string(),
            channel: channel.to_string(),
            channel_user_id: channel_user_id.clone(),
            relationship_score: 0.0,
            trust_tier_override: None,
            capsule: None,
            capsule_updated_at_ms: None,
            public_style_capsule: None,
            side_data,
            created_at_ms: now,
            updated_at_ms: now,
        })
    }

    pub fn get_person(&self, person_id: &PersonId) -> Result<Option<Person>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT person_id, display_name, channel, channel_user_id, relationship_score,
             trust_tier_override, capsule, capsule_updated_at_ms, public_style_capsule,
             side_data_json, created_at_ms, updated_at_ms FROM people WHERE person_id = ?1",
            params![person_id.as_str()],
            row_to_person,
        )
        .optional()
        .map_err(MemoryError::Io)
    }

    pub fn get_person_by_channel_id(
        &self,
        channel: &str,
        channel_user_id: &ChannelUserId,
    ) -> Result<Option<Person>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT person_id, display_name, channel, channel_user_id, relationship_score,
             trust_tier_override, capsule, capsule_updated_at_ms, public_style_capsule,
             side_data_json, created_at_ms, updated_at_ms FROM people
             WHERE channel = ?1 AND channel_user_id = ?2",
            params![channel, channel_user_id.as_str()],
            row_to_person,
        )
        .optional()
        .map_err(MemoryError::Io)
    }

    /// §4.G step 4: people whose identity capsule is missing or hasn't been
    /// refreshed since before `stale_before_ms`. No lease-based dirty queue
    /// here — staleness is a plain derived fact, not an event to claim.
    pub fn list_people_with_stale_capsule(&self, stale_before_ms: MonotonicMs, limit: u32) -> Result<Vec<Person>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT person_id, display_name, channel, channel_user_id, relationship_score,
             trust_tier_override, capsule, capsule_updated_at_ms, public_style_capsule,
             side_data_json, created_at_ms, updated_at_ms FROM people
             WHERE capsule IS NULL OR capsule_updated_at_ms < ?1
             ORDER BY person_id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![stale_before_ms.as_i64(), limit], row_to_person)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Merge-with-cap (§4.D) against the persisted side data, then persist.
    pub fn update_person_side_data(&self, person_id: &PersonId, update: &PersonSideData) -> Result<()> {
        let person = self
            .get_person(person_id)?
            .ok_or_else(|| MemoryError::NotFound { entity: "person", id: person_id.to_string() })?;
        let mut merged = person.side_data;
        merged.merge_with_cap(update);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE people SET side_data_json = ?1, updated_at_ms = ?2 WHERE person_id = ?3",
            params![serde_json::to_string(&merged)?, MonotonicMs::now().as_i64(), person_id.as_str()],
        )?;
        Ok(())
    }

    /// Wholesale overwrite, as opposed to `update_person_side_data`'s
    /// additive merge — §4.G step 4 prunes stale concerns/goals, which a
    /// merge could never shrink.
    pub fn replace_person_side_data(&self, person_id: &PersonId, side_data: &PersonSideData) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE people SET side_data_json = ?1, updated_at_ms = ?2 WHERE person_id = ?3",
            params![serde_json::to_string(side_data)?, MonotonicMs::now().as_i64(), person_id.as_str()],
        )?;
        Ok(())
    }

    pub fn set_relationship_score(&self, person_id: &PersonId, score: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE people SET relationship_score = ?1, updated_at_ms = ?2 WHERE person_id = ?3",
            params![score, MonotonicMs::now().as_i64(), person_id.as_str()],
        )?;
        Ok(())
    }

    pub fn set_trust_tier_override(&self, person_id: &PersonId, tier: Option<TrustTier>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE people SET trust_tier_override = ?1, updated_at_ms = ?2 WHERE person_id = ?3",
            params![tier.map(|t| t.to_string()), MonotonicMs::now().as_i64(), person_id.as_str()],
        )?;
        Ok(())
    }

    /// §4.G step 4: consolidation writes the refreshed identity capsule
    /// here and mirrors the result. Distinct from `set_public_style_capsule`,
    /// which writes a separate column and dirty queue.
    pub fn set_person_capsule(&self, person_id: &PersonId, capsule: &str) -> Result<()> {
        let now = MonotonicMs::now();
        let person = self
            .get_person(person_id)?
            .ok_or_else(|| MemoryError::NotFound { entity: "person", id: person_id.to_string() })?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE people SET capsule = ?1, capsule_updated_at_ms = ?2, updated_at_ms = ?2
             WHERE person_id = ?3",
            params![capsule, now.as_i64(), person_id.as_str()],
        )?;
        drop(conn);
        self.mirror.write_person_capsule(person_id, &person.display_name, capsule);
        Ok(())
    }

    /// §4.G step 2: the cross-group-safe tone digest, distinct from the
    /// identity capsule `set_person_capsule` writes. Clears the
    /// corresponding `dirty_public_styles` entry unconditionally, same
    /// write-then-clear shape as `set_group_capsule`.
    pub fn set_public_style_capsule(&self, person_id: &PersonId, capsule: &str) -> Result<()> {
        let now = MonotonicMs::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE people SET public_style_capsule = ?1, updated_at_ms = ?2 WHERE person_id = ?3",
            params![capsule, now.as_i64(), person_id.as_str()],
        )?;
        conn.execute(
            "DELETE FROM dirty_public_styles WHERE person_id = ?1",
            params![person_id.as_str()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------ facts

    #[allow(clippy::too_many_arguments)]
    pub fn store_fact(
        &self,
        person_id: Option<&PersonId>,
        subject: &str,
        content: &str,
        category: FactCategory,
        fact_type: FactType,
        temporal_scope: TemporalScope,
        evidence_quote: &str,
        confidence_tier: ConfidenceTier,
    ) -> Result<FactId> {
        let now = MonotonicMs::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO facts (person_id, subject, content, category, fact_type, temporal_scope,
             evidence_quote, confidence_tier, is_current, last_accessed_at_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)",
            params![
                person_id.map(|p| p.as_str()),
                subject,
                content,
                category.to_string(),
                fact_type.to_string(),
                temporal_scope.to_string(),
                evidence_quote,
                confidence_tier.to_string(),
                now.as_i64(),
            ],
        )?;
        let id = FactId(conn.last_insert_rowid());
        sync_fact_fts(&conn, id, subject, content)?;
        Ok(id)
    }

    pub fn update_fact_content(&self, fact_id: FactId, content: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let subject: String = conn.query_row(
            "SELECT subject FROM facts WHERE id = ?1",
            params![fact_id.0],
            |r| r.get(0),
        )?;
        conn.execute(
            "UPDATE facts SET content = ?1 WHERE id = ?2",
            params![content, fact_id.0],
        )?;
        sync_fact_fts(&conn, fact_id, &subject, content)?;
        Ok(())
    }

    pub fn set_fact_current(&self, fact_id: FactId, is_current: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE facts SET is_current = ?1 WHERE id = ?2",
            params![is_current as i64, fact_id.0],
        )?;
        Ok(())
    }

    pub fn get_fact(&self, fact_id: FactId) -> Result<Option<Fact>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, person_id, subject, content, category, fact_type, temporal_scope,
             evidence_quote, confidence_tier, is_current, last_accessed_at_ms, created_at_ms
             FROM facts WHERE id = ?1",
            params![fact_id.0],
            row_to_fact,
        )
        .optional()
        .map_err(MemoryError::Io)
    }

    /// All current facts for a person, for the dedupe/contradiction-retirement
    /// pass over person-capsule refresh (§4.G step 4).
    pub fn list_current_facts_for_person(&self, person_id: &PersonId) -> Result<Vec<Fact>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, person_id, subject, content, category, fact_type, temporal_scope,
             evidence_quote, confidence_tier, is_current, last_accessed_at_ms, created_at_ms
             FROM facts WHERE person_id = ?1 AND is_current = 1
             ORDER BY created_at_ms ASC",
        )?;
        let rows = stmt.query_map(params![person_id.as_str()], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn touch_fact_accessed(&self, conn: &Connection, fact_id: FactId, now: MonotonicMs) -> Result<()> {
        conn.execute(
            "UPDATE facts SET last_accessed_at_ms = ?1 WHERE id = ?2",
            params![now.as_i64(), fact_id.0],
        )?;
        Ok(())
    }

    /// FTS-only search (§4.C, first formula). Degrades to this whenever no
    /// `Embedder` is configured or the embedding call fails.
    pub fn search_facts_fts(
        &self,
        query: &str,
        person_id: Option<&PersonId>,
        limit: usize,
    ) -> Result<Vec<(Fact, f64)>> {
        let now = MonotonicMs::now();
        let sanitized = retrieval::sanitize_fts_query(query);
        let conn = self.conn.lock().unwrap();
        let sql = "SELECT f.id, f.person_id, f.subject, f.content, f.category, f.fact_type,
             f.temporal_scope, f.evidence_quote, f.confidence_tier, f.is_current,
             f.last_accessed_at_ms, f.created_at_ms
             FROM facts f JOIN facts_fts ON f.id = facts_fts.rowid
             WHERE facts_fts MATCH ?1 AND (?2 IS NULL OR f.person_id = ?2) AND f.is_current = 1
             ORDER BY rank LIMIT ?3";
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(
            params![sanitized, person_id.map(|p| p.as_str()), limit as i64],
            row_to_fact,
        )?;
        let facts: Vec<Fact> = rows.filter_map(|r| r.ok()).collect();

        let scored: Vec<(Fact, f64)> = facts
            .into_iter()
            .enumerate()
            .map(|(idx, fact)| {
                let age_ms = fact.created_at_ms.age_ms(now);
                let score = retrieval::fts_only_score(
                    idx + 1,
                    age_ms,
                    fact.confidence_tier,
                    self.cfg.decay.half_life_days,
                    &self.cfg.retrieval,
                );
                (fact, score)
            })
            .collect();

        for (fact, _) in &scored {
            let _ = self.touch_fact_accessed(&conn, fact.fact_id, now);
        }
        Ok(scored)
    }

    /// Hybrid search (§4.C, second formula). Async only because embedding
    /// the query text requires awaiting the `Embedder`; falls back to
    /// FTS-only on any embedding failure — `RetrievalError` never escapes.
    pub async fn hybrid_search_facts(
        &self,
        query: &str,
        person_id: Option<&PersonId>,
        limit: usize,
    ) -> Result<Vec<(Fact, f64)>> {
        let Some(embedder) = &self.embedder else {
            return self.search_facts_fts(query, person_id, limit);
        };
        let query_vec = match embedder.embed(query).await {
            Ok(v) => v,
            Err(_) => return self.search_facts_fts(query, person_id, limit),
        };

        let now = MonotonicMs::now();
        let sanitized = retrieval::sanitize_fts_query(query);
        let candidate_pool = (limit as i64 * 5).max(50);
        let conn = self.conn.lock().unwrap();

        let mut fts_stmt = conn.prepare(
            "SELECT f.id FROM facts f JOIN facts_fts ON f.id = facts_fts.rowid
             WHERE facts_fts MATCH ?1 AND (?2 IS NULL OR f.person_id = ?2) AND f.is_current = 1
             ORDER BY rank LIMIT ?3",
        )?;
        let fts_ids: Vec<i64> = fts_stmt
            .query_map(params![sanitized, person_id.map(|p| p.as_str()), candidate_pool], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut vec_stmt = conn.prepare(
            "SELECT fv.fact_id, fv.embedding FROM facts_vec fv
             JOIN facts f ON f.id = fv.fact_id
             WHERE f.is_current = 1 AND (?1 IS NULL OR f.person_id = ?1)",
        )?;
        let candidates: Vec<(i64, Vec<f32>)> = vec_stmt
            .query_map(params![person_id.map(|p| p.as_str())], |r| {
                let id: i64 = r.get(0)?;
                let blob: Vec<u8> = r.get(1)?;
                Ok((id, bytes_to_f32_vec(&blob)))
            })?
            .filter_map(|r| r.ok())
            .collect();
        let vec_ids = retrieval::rank_by_embedding(&query_vec, &candidates);

        let fts_ranks = retrieval::rank_map(&fts_ids);
        let vec_ranks = retrieval::rank_map(&vec_ids);

        let mut all_ids: Vec<i64> = fts_ids.clone();
        for id in &vec_ids {
            if !all_ids.contains(id) {
                all_ids.push(*id);
            }
        }

        let mut scored = Vec::new();
        for id in all_ids {
            let Some(fact) = conn
                .query_row(
                    "SELECT id, person_id, subject, content, category, fact_type, temporal_scope,
                     evidence_quote, confidence_tier, is_current, last_accessed_at_ms, created_at_ms
                     FROM facts WHERE id = ?1",
                    params![id],
                    row_to_fact,
                )
                .optional()?
            else {
                continue;
            };
            let age_ms = fact.created_at_ms.age_ms(now);
            let score = retrieval::hybrid_score(
                fts_ranks.get(&id).copied(),
                vec_ranks.get(&id).copied(),
                age_ms,
                fact.confidence_tier,
                self.cfg.decay.half_life_days,
                &self.cfg.retrieval,
            );
            let _ = self.touch_fact_accessed(&conn, fact.fact_id, now);
            scored.push((fact, score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Store (or replace) the embedding for a fact. No-op if no embedder is
    /// configured — callers are expected to check `has_embedder()` first.
    pub fn upsert_fact_embedding(&self, fact_id: FactId, embedding: &[f32]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO facts_vec (fact_id, embedding) VALUES (?1, ?2)
             ON CONFLICT(fact_id) DO UPDATE SET embedding = excluded.embedding",
            params![fact_id.0, f32_vec_to_bytes(embedding)],
        )?;
        Ok(())
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    // --------------------------------------------------------------- episodes

    /// Log a conversational turn. Side effects: marks the chat's group
    /// capsule dirty when `is_group`, and marks the speaker's public style
    /// dirty when a person is attached (§4.D/§4.G trigger).
    pub fn log_episode(
        &self,
        chat_id: &ChatId,
        person_id: Option<&PersonId>,
        is_group: bool,
        content: &str,
    ) -> Result<EpisodeId> {
        let now = MonotonicMs::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO episodes (chat_id, person_id, is_group, content, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chat_id.as_str(), person_id.map(|p| p.as_str()), is_group as i64, content, now.as_i64()],
        )?;
        let id = EpisodeId(conn.last_insert_rowid());
        sync_episode_fts(&conn, id, content)?;

        if is_group {
            mark_dirty(&conn, "dirty_group_capsules", "chat_id", chat_id.as_str(), now)?;
        }
        if let Some(p) = person_id {
            mark_dirty(&conn, "dirty_public_styles", "person_id", p.as_str(), now)?;
        }
        Ok(id)
    }

    pub fn mark_episode_extracted(&self, episode_id: EpisodeId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE episodes SET last_extracted_at_ms = ?1 WHERE id = ?2",
            params![MonotonicMs::now().as_i64(), episode_id.0],
        )?;
        Ok(())
    }

    /// Oldest-first across every chat, for the consolidation loop's
    /// catch-up extraction pass (§4.G step 3) — unlike
    /// `list_unextracted_episodes`, this is not scoped to one chat.
    pub fn list_unextracted_episodes_global(&self, limit: usize) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, person_id, is_group, content, last_extracted_at_ms, created_at_ms
             FROM episodes WHERE last_extracted_at_ms IS NULL
             ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_episode)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Oldest-first, for the catch-up extraction pass (§4.G).
    pub fn list_unextracted_episodes(&self, chat_id: &ChatId, limit: usize) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, person_id, is_group, content, last_extracted_at_ms, created_at_ms
             FROM episodes WHERE chat_id = ?1 AND last_extracted_at_ms IS NULL
             ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id.as_str(), limit as i64], row_to_episode)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Newest-first, for group capsule synthesis (§4.G step 1).
    pub fn list_recent_episodes_for_chat(
        &self,
        chat_id: &ChatId,
        since_ms: MonotonicMs,
        limit: usize,
    ) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, person_id, is_group, content, last_extracted_at_ms, created_at_ms
             FROM episodes WHERE chat_id = ?1 AND created_at_ms >= ?2
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![chat_id.as_str(), since_ms.as_i64(), limit as i64], row_to_episode)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Newest-first, for public-style and person-capsule synthesis (§4.G
    /// steps 2 and 4); restricted to DMs since public style must be
    /// cross-group safe.
    pub fn list_recent_dm_episodes_for_person(
        &self,
        person_id: &PersonId,
        since_ms: MonotonicMs,
        limit: usize,
    ) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, person_id, is_group, content, last_extracted_at_ms, created_at_ms
             FROM episodes WHERE person_id = ?1 AND is_group = 0 AND created_at_ms >= ?2
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![person_id.as_str(), since_ms.as_i64(), limit as i64], row_to_episode)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------- lessons

    #[allow(clippy::too_many_arguments)]
    pub fn add_lesson(
        &self,
        category: &str,
        lesson_type: Option<&str>,
        content: &str,
        rule: Option<&str>,
        alternative: Option<&str>,
        person_id: Option<&PersonId>,
        episode_refs: &[EpisodeId],
        confidence: Option<f64>,
    ) -> Result<LessonId> {
        let now = MonotonicMs::now();
        let conn = self.conn.lock().unwrap();
        let refs_json = serde_json::to_string(&episode_refs.iter().map(|e| e.0).collect::<Vec<_>>())?;
        conn.execute(
            "INSERT INTO lessons (category, lesson_type, content, rule, alternative, person_id,
             episode_refs_json, confidence, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                category,
                lesson_type,
                content,
                rule,
                alternative,
                person_id.map(|p| p.as_str()),
                refs_json,
                confidence,
                now.as_i64(),
            ],
        )?;
        Ok(LessonId(conn.last_insert_rowid()))
    }

    /// §3: bump `timesValidated`/`timesViolated` and recompute `promoted`.
    pub fn record_lesson_outcome(&self, lesson_id: LessonId, validated: bool) -> Result<Lesson> {
        let conn = self.conn.lock().unwrap();
        if validated {
            conn.execute(
                "UPDATE lessons SET times_validated = times_validated + 1 WHERE id = ?1",
                params![lesson_id.0],
            )?;
        } else {
            conn.execute(
                "UPDATE lessons SET times_violated = times_violated + 1 WHERE id = ?1",
                params![lesson_id.0],
            )?;
        }
        let mut lesson = conn
            .query_row(
                "SELECT id, category, lesson_type, content, rule, alternative, person_id,
                 episode_refs_json, confidence, times_validated, times_violated, promoted, created_at_ms
                 FROM lessons WHERE id = ?1",
                params![lesson_id.0],
                row_to_lesson,
            )
            .map_err(MemoryError::Io)?;
        let should_promote = lesson.should_be_promoted();
        if should_promote != lesson.promoted {
            conn.execute(
                "UPDATE lessons SET promoted = ?1 WHERE id = ?2",
                params![should_promote as i64, lesson_id.0],
            )?;
            lesson.promoted = should_promote;
        }
        Ok(lesson)
    }

    pub fn list_lessons_for_person(&self, person_id: Option<&PersonId>, promoted_only: bool) -> Result<Vec<Lesson>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, category, lesson_type, content, rule, alternative, person_id,
             episode_refs_json, confidence, times_validated, times_violated, promoted, created_at_ms
             FROM lessons WHERE (?1 IS NULL OR person_id = ?1) AND (?2 = 0 OR promoted = 1)
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(
            params![person_id.map(|p| p.as_str()), promoted_only as i64],
            row_to_lesson,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Newest-first, for the pattern-detection sweep over the last 24h
    /// (§4.G step 5).
    pub fn list_lessons_since(&self, since_ms: MonotonicMs) -> Result<Vec<Lesson>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, category, lesson_type, content, rule, alternative, person_id,
             episode_refs_json, confidence, times_validated, times_violated, promoted, created_at_ms
             FROM lessons WHERE created_at_ms >= ?1
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![since_ms.as_i64()], row_to_lesson)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Unconditionally marks a lesson promoted — the sweep-based promotion
    /// of §4.G step 5, as opposed to `record_lesson_outcome`'s incremental
    /// recompute on each validate/violate.
    pub fn promote_lesson(&self, lesson_id: LessonId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE lessons SET promoted = 1 WHERE id = ?1", params![lesson_id.0])?;
        Ok(())
    }

    /// §4.G step 6: best-effort markdown mirror of every promoted lesson.
    /// `rendered` is produced by the caller so the rendering format stays
    /// out of the store; this only owns fetching the rows and the mirror
    /// write.
    pub fn mirror_lessons(&self, rendered: &str) {
        self.mirror.write_lessons(rendered);
    }

    // -------------------------------------------------------------- capsules

    pub fn get_group_capsule(&self, chat_id: &ChatId) -> Result<Option<GroupCapsule>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT chat_id, capsule, updated_at_ms FROM group_capsules WHERE chat_id = ?1",
            params![chat_id.as_str()],
            |row| {
                Ok(GroupCapsule {
                    chat_id: ChatId::from(row.get::<_, String>(0)?),
                    capsule: row.get(1)?,
                    updated_at_ms: MonotonicMs::from(row.get::<_, i64>(2)?),
                })
            },
        )
        .optional()
        .map_err(MemoryError::Io)
    }

    pub fn set_group_capsule(&self, chat_id: &ChatId, capsule: &str) -> Result<()> {
        let now = MonotonicMs::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO group_capsules (chat_id, capsule, updated_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET capsule = excluded.capsule, updated_at_ms = excluded.updated_at_ms",
            params![chat_id.as_str(), capsule, now.as_i64()],
        )?;
        conn.execute(
            "DELETE FROM dirty_group_capsules WHERE chat_id = ?1",
            params![chat_id.as_str()],
        )?;
        drop(conn);
        self.mirror.write_group_capsule(chat_id, capsule);
        Ok(())
    }

    // ------------------------------------------------------------ dirty queue

    /// Atomically claim up to `limit` group-capsule dirty entries not
    /// currently under an unexpired claim.
    pub fn claim_dirty_group_capsules(
        &self,
        limit: u32,
        claim_id: &str,
        lease_ms: i64,
    ) -> Result<Vec<DirtyClaim<ChatId>>> {
        self.claim_dirty(
            "dirty_group_capsules",
            "chat_id",
            limit,
            claim_id,
            lease_ms,
            |s| ChatId::from(s),
        )
    }

    pub fn complete_dirty_group_capsule(&self, chat_id: &ChatId, claim_id: &str, first_dirty_at_ms: MonotonicMs) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        complete_dirty(&conn, "dirty_group_capsules", "chat_id", chat_id.as_str(), claim_id, first_dirty_at_ms)
    }

    pub fn claim_dirty_public_styles(
        &self,
        limit: u32,
        claim_id: &str,
        lease_ms: i64,
    ) -> Result<Vec<DirtyClaim<PersonId>>> {
        self.claim_dirty(
            "dirty_public_styles",
            "person_id",
            limit,
            claim_id,
            lease_ms,
            |s| PersonId::from(s),
        )
    }

    pub fn complete_dirty_public_style(&self, person_id: &PersonId, claim_id: &str, first_dirty_at_ms: MonotonicMs) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        complete_dirty(&conn, "dirty_public_styles", "person_id", person_id.as_str(), claim_id, first_dirty_at_ms)
    }

    fn claim_dirty<K>(
        &self,
        table: &str,
        key_col: &str,
        limit: u32,
        claim_id: &str,
        lease_ms: i64,
        from_str: impl Fn(String) -> K,
    ) -> Result<Vec<DirtyClaim<K>>> {
        let now = MonotonicMs::now();
        let conn = self.conn.lock().unwrap();
        let select_sql = format!(
            "SELECT {key_col}, first_dirty_at_ms FROM {table}
             WHERE claim_id IS NULL OR claim_until_ms <= ?1
             ORDER BY first_dirty_at_ms ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&select_sql)?;
        let candidates: Vec<(String, i64)> = stmt
            .query_map(params![now.as_i64(), limit as i64], |r| Ok((r.get(0)?, r.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut claimed = Vec::new();
        let claim_until = now.plus_ms(lease_ms);
        for (key_str, first_dirty_at_ms) in candidates {
            let update_sql = format!(
                "UPDATE {table} SET claim_id = ?1, claim_until_ms = ?2
                 WHERE {key_col} = ?3 AND (claim_id IS NULL OR claim_until_ms <= ?4)"
            );
            let affected = conn.execute(&update_sql, params![claim_id, claim_until.as_i64(), key_str, now.as_i64()])?;
            if affected > 0 {
                claimed.push(DirtyClaim {
                    key: from_str(key_str),
                    first_dirty_at_ms: MonotonicMs::from(first_dirty_at_ms),
                });
            }
        }
        Ok(claimed)
    }

    // ----------------------------------------------------- observation counters

    pub fn get_observation_counters(&self, person_id: &PersonId) -> Result<Option<ObservationCounters>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT person_id, avg_response_len, avg_incoming_len, active_hours_mask,
             conversation_count, sample_count FROM observation_counters WHERE person_id = ?1",
            params![person_id.as_str()],
            row_to_counters,
        )
        .optional()
        .map_err(MemoryError::Io)
    }

    /// Incremental running average update, one observation at a time.
    pub fn record_observation(&self, person_id: &PersonId, response_len: f64, incoming_len: f64, hour_utc: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let existing = conn
            .query_row(
                "SELECT avg_response_len, avg_incoming_len, active_hours_mask, conversation_count, sample_count
                 FROM observation_counters WHERE person_id = ?1",
                params![person_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let (avg_resp, avg_in, mask, conv, samples) = existing.unwrap_or((0.0, 0.0, 0, 0, 0));
        let new_samples = samples + 1;
        let new_avg_resp = avg_resp + (response_len - avg_resp) / new_samples as f64;
        let new_avg_in = avg_in + (incoming_len - avg_in) / new_samples as f64;
        let new_mask = mask | (1i64 << (hour_utc % 24));

        conn.execute(
            "INSERT INTO observation_counters
             (person_id, avg_response_len, avg_incoming_len, active_hours_mask, conversation_count, sample_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(person_id) DO UPDATE SET
                avg_response_len = excluded.avg_response_len,
                avg_incoming_len = excluded.avg_incoming_len,
                active_hours_mask = excluded.active_hours_mask,
                conversation_count = excluded.conversation_count,
                sample_count = excluded.sample_count",
            params![person_id.as_str(), new_avg_resp, new_avg_in, new_mask, conv + 1, new_samples],
        )?;
        Ok(())
    }
}

fn mark_dirty(conn: &Connection, table: &str, key_col: &str, key: &str, now: MonotonicMs) -> Result<()> {
    let sql = format!(
        "INSERT INTO {table} ({key_col}, first_dirty_at_ms) VALUES (?1, ?2)
         ON CONFLICT({key_col}) DO UPDATE SET first_dirty_at_ms = CASE
            WHEN {table}.claim_id IS NULL THEN {table}.first_dirty_at_ms
            ELSE excluded.first_dirty_at_ms
         END"
    );
    conn.execute(&sql, params![key, now.as_i64()])?;
    Ok(())
}

/// Delete the claimed row only if `first_dirty_at_ms` has not moved since
/// the claim was taken; otherwise the entity was marked dirty again while
/// in flight, so release the claim and leave it for the next sweep.
fn complete_dirty(
    conn: &Connection,
    table: &str,
    key_col: &str,
    key: &str,
    claim_id: &str,
    seen_first_dirty_at_ms: MonotonicMs,
) -> Result<()> {
    let delete_sql = format!(
        "DELETE FROM {table} WHERE {key_col} = ?1 AND claim_id = ?2 AND first_dirty_at_ms = ?3"
    );
    let affected = conn.execute(&delete_sql, params![key, claim_id, seen_first_dirty_at_ms.as_i64()])?;
    if affected == 0 {
        let release_sql = format!(
            "UPDATE {table} SET claim_id = NULL, claim_until_ms = NULL WHERE {key_col} = ?1 AND claim_id = ?2"
        );
        conn.execute(&release_sql, params![key, claim_id])?;
    }
    Ok(())
}

fn sync_fact_fts(conn: &Connection, id: FactId, subject: &str, content: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO facts_fts(facts_fts, rowid, content, subject) VALUES('delete', ?1, ?2, ?3)",
        params![id.0, content, subject],
    )
    .ok();
    conn.execute(
        "INSERT INTO facts_fts(rowid, content, subject) VALUES (?1, ?2, ?3)",
        params![id.0, content, subject],
    )?;
    Ok(())
}

fn sync_episode_fts(conn: &Connection, id: EpisodeId, content: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO episodes_fts(rowid, content) VALUES (?1, ?2)",
        params![id.0, content],
    )?;
    Ok(())
}

fn f32_vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32_vec(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn row_to_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    let side_data_json: String = row.get(9)?;
    let side_data: PersonSideData = serde_json::from_str(&side_data_json).unwrap_or_default();
    let trust_str: Option<String> = row.get(5)?;
    Ok(Person {
        person_id: PersonId::from(row.get::<_, String>(0)?),
        display_name: row.get(1)?,
        channel: row.get(2)?,
        channel_user_id: ChannelUserId::from(row.get::<_, String>(3)?),
        relationship_score: row.get(4)?,
        trust_tier_override: trust_str.and_then(|s| TrustTier::from_str(&s).ok()),
        capsule: row.get(6)?,
        capsule_updated_at_ms: row.get::<_, Option<i64>>(7)?.map(MonotonicMs::from),
        public_style_capsule: row.get(8)?,
        side_data,
        created_at_ms: MonotonicMs::from(row.get::<_, i64>(10)?),
        updated_at_ms: MonotonicMs::from(row.get::<_, i64>(11)?),
    })
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let category: String = row.get(4)?;
    let fact_type: String = row.get(5)?;
    let temporal_scope: String = row.get(6)?;
    let confidence_tier: String = row.get(8)?;
    let person_id: Option<String> = row.get(1)?;
    Ok(Fact {
        fact_id: FactId(row.get(0)?),
        person_id: person_id.map(PersonId::from),
        subject: row.get(2)?,
        content: row.get(3)?,
        category: FactCategory::from_str(&category).unwrap_or(FactCategory::Misc),
        fact_type: FactType::from_str(&fact_type).unwrap_or(FactType::Factual),
        temporal_scope: TemporalScope::from_str(&temporal_scope).unwrap_or(TemporalScope::Unknown),
        evidence_quote: row.get(7)?,
        confidence_tier: ConfidenceTier::from_str(&confidence_tier).unwrap_or(ConfidenceTier::Medium),
        is_current: row.get::<_, i64>(9)? != 0,
        last_accessed_at_ms: MonotonicMs::from(row.get::<_, i64>(10)?),
        created_at_ms: MonotonicMs::from(row.get::<_, i64>(11)?),
    })
}

fn row_to_episode(row: &rusqlite::Row<'_>) -> rusqlite::Result<Episode> {
    let person_id: Option<String> = row.get(2)?;
    Ok(Episode {
        episode_id: EpisodeId(row.get(0)?),
        chat_id: ChatId::from(row.get::<_, String>(1)?),
        person_id: person_id.map(PersonId::from),
        is_group: row.get::<_, i64>(3)? != 0,
        content: row.get(4)?,
        last_extracted_at_ms: row.get::<_, Option<i64>>(5)?.map(MonotonicMs::from),
        created_at_ms: MonotonicMs::from(row.get::<_, i64>(6)?),
    })
}

fn row_to_lesson(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lesson> {
    let person_id: Option<String> = row.get(6)?;
    let refs_json: String = row.get(7)?;
    let episode_refs: Vec<i64> = serde_json::from_str(&refs_json).unwrap_or_default();
    Ok(Lesson {
        lesson_id: LessonId(row.get(0)?),
        category: row.get(1)?,
        lesson_type: row.get(2)?,
        content: row.get(3)?,
        rule: row.get(4)?,
        alternative: row.get(5)?,
        person_id: person_id.map(PersonId::from),
        episode_refs: episode_refs.into_iter().map(EpisodeId).collect(),
        confidence: row.get(8)?,
        times_validated: row.get::<_, i64>(9)? as u32,
        times_violated: row.get::<_, i64>(10)? as u32,
        promoted: row.get::<_, i64>(11)? != 0,
        created_at_ms: MonotonicMs::from(row.get::<_, i64>(12)?),
    })
}

fn row_to_counters(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObservationCounters> {
    Ok(ObservationCounters {
        person_id: PersonId::from(row.get::<_, String>(0)?),
        avg_response_len: row.get(1)?,
        avg_incoming_len: row.get(2)?,
        active_hours_mask: row.get::<_, i64>(3)? as u32,
        conversation_count: row.get::<_, i64>(4)? as u32,
        sample_count: row.get::<_, i64>(5)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::NullMirrorSink;

    fn store() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        MemoryStore::new(conn, MemoryConfig::default(), None, Arc::new(NullMirrorSink)).unwrap()
    }

    #[test]
    fn track_person_is_idempotent_by_channel_id() {
        let s = store();
        let cu = ChannelUserId::from("tg:1");
        let a = s.track_person("telegram", &cu, "Ada").unwrap();
        let b = s.track_person("telegram", &cu, "Ada (renamed locally)").unwrap();
        assert_eq!(a.person_id, b.person_id);
        assert_eq!(b.display_name, "Ada");
    }

    #[test]
    fn fact_fts_roundtrip_and_score_ordering() {
        let s = store();
        let cu = ChannelUserId::from("tg:1");
        let person = s.track_person("telegram", &cu, "Ada").unwrap();
        s.store_fact(
            Some(&person.person_id),
            "diet",
            "vegetarian",
            FactCategory::Preference,
            FactType::Preference,
            TemporalScope::Current,
            "\"I am vegetarian\"",
            ConfidenceTier::High,
        )
        .unwrap();
        s.store_fact(
            Some(&person.person_id),
            "hobby",
            "plays chess weekly",
            FactCategory::Personal,
            FactType::Factual,
            TemporalScope::Current,
            "\"I play chess every week\"",
            ConfidenceTier::Low,
        )
        .unwrap();

        let hits = s.search_facts_fts("vegetarian", Some(&person.person_id), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.subject, "diet");
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn dirty_claim_release_on_redirty_during_claim() {
        let s = store();
        let chat = ChatId::from("telegram:-100");
        let cu = ChannelUserId::from("tg:1");
        let person = s.track_person("telegram", &cu, "Ada").unwrap();
        s.log_episode(&chat, Some(&person.person_id), true, "hello group").unwrap();

        let claims = s.claim_dirty_group_capsules(10, "worker-1", 60_000).unwrap();
        assert_eq!(claims.len(), 1);
        let claim = &claims[0];

        // Someone re-dirties the chat while the claim is held.
        s.log_episode(&chat, Some(&person.person_id), true, "another message").unwrap();

        s.complete_dirty_group_capsule(&claim.key, "worker-1", claim.first_dirty_at_ms).unwrap();

        // Must still be present for the next sweep, not deleted.
        let requeued = s.claim_dirty_group_capsules(10, "worker-2", 60_000).unwrap();
        assert_eq!(requeued.len(), 1);
    }

    #[test]
    fn dirty_claim_completes_cleanly_when_untouched() {
        let s = store();
        let chat = ChatId::from("telegram:-100");
        let cu = ChannelUserId::from("tg:1");
        let person = s.track_person("telegram", &cu, "Ada").unwrap();
        s.log_episode(&chat, Some(&person.person_id), true, "hello group").unwrap();

        let claims = s.claim_dirty_group_capsules(10, "worker-1", 60_000).unwrap();
        let claim = &claims[0];
        s.complete_dirty_group_capsule(&claim.key, "worker-1", claim.first_dirty_at_ms).unwrap();

        let requeued = s.claim_dirty_group_capsules(10, "worker-2", 60_000).unwrap();
        assert!(requeued.is_empty());
    }

    #[test]
    fn lesson_promotion_flips_through_record_outcome() {
        let s = store();
        let lesson_id = s
            .add_lesson("style", None, "prefers terse replies", None, None, None, &[], None)
            .unwrap();
        s.record_lesson_outcome(lesson_id, true).unwrap();
        let lesson = s.record_lesson_outcome(lesson_id, true).unwrap();
        assert!(lesson.promoted);
    }
}
