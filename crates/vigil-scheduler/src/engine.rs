//! Event scheduler (§4.E): proactive events, open loops, and the
//! send-rate accounting that gates them. Keeps the teacher's
//! single-`Connection`-behind-a-`Mutex` shape and its atomic
//! conditional-`UPDATE` claim pattern, generalized from a single `jobs`
//! table to the three tables this domain needs.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use vigil_core::config::ScopeLimitsConfig;
use vigil_core::ids::{ChatId, EventId, OpenLoopId};
use vigil_core::time::MonotonicMs;

use crate::db;
use crate::error::{Result, SchedulerError};
use crate::types::{
    derive_is_group, EmotionalWeight, EventKind, OpenLoop, OpenLoopCategory, OpenLoopStatus,
    ProactiveEvent, Recurrence,
};

/// Owns the `proactive.db` connection. `Send + Sync` via the mutex so it
/// can be shared across the consolidation ticker and any delivery worker.
pub struct EventScheduler {
    conn: Mutex<Connection>,
}

impl EventScheduler {
    pub fn new(mut conn: Connection) -> Result<Self> {
        db::init_db(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// §4.E `addEvent`. Dedupes on `(chatId, kind, subject, triggerAtMs,
    /// recurrence)` via `INSERT OR IGNORE`; a collision returns the id of
    /// the event already on file rather than erroring.
    pub fn add_event(
        &self,
        kind: EventKind,
        subject: &str,
        chat_id: &ChatId,
        trigger_at_ms: MonotonicMs,
        recurrence: Option<Recurrence>,
        now: MonotonicMs,
    ) -> Result<EventId> {
        let conn = self.conn.lock().unwrap();
        let event_id = EventId::new();
        let recurrence_str = recurrence.map(|r| r.to_string());
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO proactive_events
                (event_id, kind, subject, chat_id, trigger_at_ms, recurrence, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event_id.as_str(),
                kind.to_string(),
                subject,
                chat_id.as_str(),
                trigger_at_ms.as_i64(),
                recurrence_str,
                now.as_i64(),
            ],
        )?;

        if inserted == 1 {
            info!(event_id = %event_id, %kind, chat_id = %chat_id, "proactive event added");
            return Ok(event_id);
        }

        let existing: String = conn.query_row(
            "SELECT event_id FROM proactive_events
             WHERE chat_id = ?1 AND kind = ?2 AND subject = ?3 AND trigger_at_ms = ?4
               AND recurrence IS ?5",
            params![chat_id.as_str(), kind.to_string(), subject, trigger_at_ms.as_i64(), recurrence_str],
            |row| row.get(0),
        )?;
        Ok(EventId::from(existing))
    }

    /// §4.E `claimPendingEvents`: atomic multi-worker claim over events due
    /// within `window_ms` of `now` that are undelivered and either
    /// unclaimed or whose claim has expired. Same conditional-`UPDATE`
    /// pattern as the memory dirty queue's claim.
    pub fn claim_pending_events(
        &self,
        now: MonotonicMs,
        window_ms: i64,
        limit: usize,
        lease_ms: i64,
        claim_id: &str,
    ) -> Result<Vec<ProactiveEvent>> {
        let conn = self.conn.lock().unwrap();
        let horizon = now.as_i64() + window_ms;
        let claim_until = now.as_i64() + lease_ms;

        let candidate_ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT event_id FROM proactive_events
                 WHERE delivered = 0 AND trigger_at_ms <= ?1
                   AND (claim_id IS NULL OR claim_until_ms <= ?2)
                 ORDER BY trigger_at_ms
                 LIMIT ?3",
            )?;
            stmt.query_map(params![horizon, now.as_i64(), limit as i64], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?
        };

        let mut claimed = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let affected = conn.execute(
                "UPDATE proactive_events SET claim_id = ?1, claim_until_ms = ?2
                 WHERE event_id = ?3 AND delivered = 0
                   AND (claim_id IS NULL OR claim_until_ms <= ?4)",
                params![claim_id, claim_until, id, now.as_i64()],
            )?;
            if affected == 1 {
                claimed.push(row_to_event(&conn, &id)?);
            } else {
                warn!(event_id = %id, "lost claim race to another worker");
            }
        }
        Ok(claimed)
    }

    /// §4.E `markDelivered`. No-op if `claim_id` no longer matches (the
    /// lease expired and someone else claimed it first). A yearly event is
    /// rescheduled to next year's occurrence rather than marked delivered
    /// permanently.
    pub fn mark_delivered(&self, event_id: &EventId, claim_id: &str, now: MonotonicMs) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(Option<String>, i64)> = conn
            .query_row(
                "SELECT recurrence, trigger_at_ms FROM proactive_events
                 WHERE event_id = ?1 AND claim_id = ?2",
                params![event_id.as_str(), claim_id],
                |row| Ok((row.get(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let Some((recurrence, trigger_at_ms)) = row else {
            return Ok(());
        };

        if recurrence.as_deref() == Some("yearly") {
            let next = next_yearly_occurrence(MonotonicMs::from(trigger_at_ms), now);
            conn.execute(
                "UPDATE proactive_events
                 SET trigger_at_ms = ?1, claim_id = NULL, claim_until_ms = NULL
                 WHERE event_id = ?2 AND claim_id = ?3",
                params![next.as_i64(), event_id.as_str(), claim_id],
            )?;
        } else {
            conn.execute(
                "UPDATE proactive_events
                 SET delivered = 1, claim_id = NULL, claim_until_ms = NULL
                 WHERE event_id = ?1 AND claim_id = ?2",
                params![event_id.as_str(), claim_id],
            )?;
        }
        Ok(())
    }

    /// §4.E `releaseClaim`: give up a claim without delivering (e.g. the
    /// channel adapter failed to send). Another worker can pick it up
    /// immediately rather than waiting out the lease.
    pub fn release_claim(&self, event_id: &EventId, claim_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE proactive_events SET claim_id = NULL, claim_until_ms = NULL
             WHERE event_id = ?1 AND claim_id = ?2",
            params![event_id.as_str(), claim_id],
        )?;
        Ok(())
    }

    /// Withdraws an event regardless of claim state — used when an open
    /// loop it was attached to resolves before the event ever fired (§4.F
    /// step 7). Unlike `markDelivered`, this never re-triggers a yearly
    /// event; it simply removes the row.
    pub fn cancel_event(&self, event_id: &EventId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM proactive_events WHERE event_id = ?1",
            params![event_id.as_str()],
        )?;
        Ok(())
    }

    /// §4.E `logProactiveSend`. `isGroup` is derived from `chatId` so
    /// callers never have to thread channel metadata through the
    /// scheduler.
    pub fn log_proactive_send(
        &self,
        chat_id: &ChatId,
        event_id: Option<&EventId>,
        now: MonotonicMs,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO proactive_log (chat_id, sent_at_ms, proactive_event_id, is_group)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                chat_id.as_str(),
                now.as_i64(),
                event_id.map(|e| e.as_str().to_string()),
                derive_is_group(chat_id) as i64,
            ],
        )?;
        Ok(())
    }

    /// §4.E `markProactiveResponded`: flips the most recent unresponded
    /// send for the chat. A no-op if there is none (the inbound message
    /// wasn't a reply to a proactive send).
    pub fn mark_proactive_responded(&self, chat_id: &ChatId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE proactive_log SET responded = 1 WHERE id = (
                SELECT id FROM proactive_log
                WHERE chat_id = ?1 AND responded = 0
                ORDER BY sent_at_ms DESC LIMIT 1
             )",
            params![chat_id.as_str()],
        )?;
        Ok(())
    }

    pub fn count_recent_sends_for_chat(&self, chat_id: &ChatId, since: MonotonicMs) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM proactive_log WHERE chat_id = ?1 AND sent_at_ms >= ?2",
            params![chat_id.as_str(), since.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn count_recent_sends_for_scope(&self, is_group: bool, since: MonotonicMs) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM proactive_log WHERE is_group = ?1 AND sent_at_ms >= ?2",
            params![is_group as i64, since.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Counts how many of the chat's most recent sends (looking back at
    /// most `tail` of them) went unresponded, stopping at the first
    /// responded one. Feeds the pause-after-ignored rule.
    pub fn count_ignored_recent(&self, chat_id: &ChatId, tail: u32) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let rows: Vec<bool> = {
            let mut stmt = conn.prepare(
                "SELECT responded FROM proactive_log WHERE chat_id = ?1
                 ORDER BY sent_at_ms DESC LIMIT ?2",
            )?;
            stmt.query_map(params![chat_id.as_str(), tail as i64], |row| {
                Ok(row.get::<_, i64>(0)? != 0)
            })?
            .collect::<std::result::Result<_, _>>()?
        };

        let mut ignored = 0;
        for responded in rows {
            if responded {
                break;
            }
            ignored += 1;
        }
        Ok(ignored)
    }

    /// §4.E proactive-send rate gate. Checked in order — scope cap, then
    /// post-reply cooldown, then pause-after-ignored — and short-circuits
    /// on the first violation so the caller learns which rule fired.
    pub fn should_suppress_proactive(
        &self,
        chat_id: &ChatId,
        is_group: bool,
        now: MonotonicMs,
        last_user_message_at_ms: Option<MonotonicMs>,
        limits: &ScopeLimitsConfig,
    ) -> Result<bool> {
        let day_ago = now.minus_ms(24 * 60 * 60 * 1000);
        let week_ago = now.minus_ms(7 * 24 * 60 * 60 * 1000);

        if self.count_recent_sends_for_chat(chat_id, day_ago)? >= limits.max_per_day
            || self.count_recent_sends_for_scope(is_group, week_ago)? >= limits.max_per_week
        {
            return Ok(true);
        }

        if let Some(last_user) = last_user_message_at_ms {
            if last_user.age_ms(now) < limits.cooldown_after_user_ms as i64 {
                return Ok(true);
            }
        }

        if self.count_ignored_recent(chat_id, limits.pause_after_ignored)? >= limits.pause_after_ignored {
            return Ok(true);
        }

        Ok(false)
    }

    /// §4.F step 7. Inserts a new open loop or bumps `mention_count` on an
    /// existing one, keyed by `(chatId, subjectKey)`.
    pub fn upsert_open_loop(
        &self,
        chat_id: &ChatId,
        subject_key: &str,
        subject: &str,
        category: OpenLoopCategory,
        emotional_weight: EmotionalWeight,
        anchor_date_ms: Option<MonotonicMs>,
        evidence_quote: &str,
        follow_up_question: &str,
    ) -> Result<OpenLoopId> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO open_loops
                (chat_id, subject_key, subject, category, emotional_weight, anchor_date_ms,
                 evidence_quote, follow_up_question)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(chat_id, subject_key) DO UPDATE SET
                mention_count = open_loops.mention_count + 1,
                evidence_quote = excluded.evidence_quote,
                follow_up_question = excluded.follow_up_question,
                status = 'open'",
            params![
                chat_id.as_str(),
                subject_key,
                subject,
                category.to_string(),
                emotional_weight.to_string(),
                anchor_date_ms.map(|m| m.as_i64()),
                evidence_quote,
                follow_up_question,
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM open_loops WHERE chat_id = ?1 AND subject_key = ?2",
            params![chat_id.as_str(), subject_key],
            |row| row.get(0),
        )?;
        Ok(OpenLoopId::from(id))
    }

    /// §4.F: resolving an open loop cancels any attached follow-up event,
    /// so the caller gets the id back to act on.
    pub fn resolve_open_loop(&self, chat_id: &ChatId, subject_key: &str) -> Result<Option<EventId>> {
        let conn = self.conn.lock().unwrap();
        let follow_up: Option<String> = conn
            .query_row(
                "SELECT follow_up_event_id FROM open_loops WHERE chat_id = ?1 AND subject_key = ?2",
                params![chat_id.as_str(), subject_key],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        conn.execute(
            "UPDATE open_loops SET status = 'resolved' WHERE chat_id = ?1 AND subject_key = ?2",
            params![chat_id.as_str(), subject_key],
        )?;

        Ok(follow_up.map(EventId::from))
    }

    pub fn attach_follow_up_event_to_open_loop(
        &self,
        chat_id: &ChatId,
        subject_key: &str,
        event_id: &EventId,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE open_loops SET follow_up_event_id = ?1 WHERE chat_id = ?2 AND subject_key = ?3",
            params![event_id.as_str(), chat_id.as_str(), subject_key],
        )?;
        Ok(())
    }

    pub fn list_open_loops_for_chat(&self, chat_id: &ChatId, status: OpenLoopStatus) -> Result<Vec<OpenLoop>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, subject_key, subject, category, emotional_weight, anchor_date_ms,
                    evidence_quote, follow_up_question, mention_count, status, follow_up_event_id
             FROM open_loops WHERE chat_id = ?1 AND status = ?2
             ORDER BY mention_count DESC",
        )?;
        let rows = stmt
            .query_map(params![chat_id.as_str(), status.to_string()], row_to_open_loop)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_event(conn: &Connection, event_id: &str) -> Result<ProactiveEvent> {
    conn.query_row(
        "SELECT event_id, kind, subject, chat_id, trigger_at_ms, recurrence, delivered,
                created_at_ms, claim_id, claim_until_ms
         FROM proactive_events WHERE event_id = ?1",
        params![event_id],
        |row| {
            let recurrence: Option<String> = row.get(5)?;
            Ok(ProactiveEvent {
                event_id: EventId::from(row.get::<_, String>(0)?),
                kind: row.get::<_, String>(1)?.parse().unwrap_or(EventKind::Reminder),
                subject: row.get(2)?,
                chat_id: ChatId::from(row.get::<_, String>(3)?),
                trigger_at_ms: MonotonicMs::from(row.get::<_, i64>(4)?),
                recurrence: recurrence.and_then(|r| r.parse().ok()),
                delivered: row.get::<_, i64>(6)? != 0,
                created_at_ms: MonotonicMs::from(row.get::<_, i64>(7)?),
                claim_id: row.get(8)?,
                claim_until_ms: row.get::<_, Option<i64>>(9)?.map(MonotonicMs::from),
            })
        },
    )
    .map_err(SchedulerError::Io)
}

fn row_to_open_loop(row: &rusqlite::Row) -> rusqlite::Result<OpenLoop> {
    let anchor: Option<i64> = row.get(6)?;
    let follow_up: Option<String> = row.get(11)?;
    Ok(OpenLoop {
        id: OpenLoopId::from(row.get::<_, i64>(0)?),
        chat_id: ChatId::from(row.get::<_, String>(1)?),
        subject_key: row.get(2)?,
        subject: row.get(3)?,
        category: row.get::<_, String>(4)?.parse().unwrap_or(OpenLoopCategory::OngoingEffort),
        emotional_weight: row.get::<_, String>(5)?.parse().unwrap_or(EmotionalWeight::Low),
        anchor_date_ms: anchor.map(MonotonicMs::from),
        evidence_quote: row.get(7)?,
        follow_up_question: row.get(8)?,
        mention_count: row.get::<_, i64>(9)? as u32,
        status: row.get::<_, String>(10)?.parse().unwrap_or(OpenLoopStatus::Open),
        follow_up_event_id: follow_up.map(EventId::from),
    })
}

/// Adds one year to `trigger_at_ms`, keeping the same month/day/time where
/// possible (Feb 29 falls back to Feb 28 in a non-leap year). If the
/// computed occurrence has already passed `now`, advances a further year.
fn next_yearly_occurrence(trigger_at_ms: MonotonicMs, now: MonotonicMs) -> MonotonicMs {
    use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(trigger_at_ms.as_i64())
        .single()
        .unwrap_or_else(Utc::now);

    let mut next = dt;
    loop {
        let year = next.year() + 1;
        next = next
            .with_year(year)
            .or_else(|| Utc.with_ymd_and_hms(year, 2, 28, next.hour(), next.minute(), next.second()).single())
            .unwrap_or(next);
        if next.timestamp_millis() > now.as_i64() {
            break;
        }
    }
    MonotonicMs::from(next.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> EventScheduler {
        EventScheduler::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn add_event_dedupes_on_full_tuple() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        let now = MonotonicMs::from(1_000);
        let a = s
            .add_event(EventKind::Reminder, "dentist", &chat, MonotonicMs::from(5_000), Some(Recurrence::Once), now)
            .unwrap();
        let b = s
            .add_event(EventKind::Reminder, "dentist", &chat, MonotonicMs::from(5_000), Some(Recurrence::Once), now)
            .unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn claim_pending_events_respects_window_and_is_atomic_per_row() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        let now = MonotonicMs::from(10_000);
        s.add_event(EventKind::Reminder, "call mom", &chat, MonotonicMs::from(9_000), None, now).unwrap();
        s.add_event(EventKind::Reminder, "far future", &chat, MonotonicMs::from(999_999), None, now).unwrap();

        let claimed = s.claim_pending_events(now, 0, 10, 60_000, "worker-a").unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].subject, "call mom");

        let reclaimed = s.claim_pending_events(now, 0, 10, 60_000, "worker-b").unwrap();
        assert!(reclaimed.is_empty(), "an active lease must not be claimable by another worker");
    }

    #[test]
    fn claim_pending_events_is_exclusive_across_concurrent_workers() {
        let s = std::sync::Arc::new(scheduler());
        let chat = ChatId::from("telegram:1");
        let now = MonotonicMs::from(10_000);
        s.add_event(EventKind::Reminder, "dentist", &chat, MonotonicMs::from(9_000), None, now).unwrap();

        let a = std::sync::Arc::clone(&s);
        let b = std::sync::Arc::clone(&s);
        let ta = std::thread::spawn(move || a.claim_pending_events(now.plus_ms(1_000), 0, 10, 60_000, "A").unwrap());
        let tb = std::thread::spawn(move || b.claim_pending_events(now.plus_ms(1_000), 0, 10, 60_000, "B").unwrap());

        let claimed_a = ta.join().unwrap();
        let claimed_b = tb.join().unwrap();
        assert_eq!(claimed_a.len() + claimed_b.len(), 1, "exactly one worker must win the claim");
    }

    #[test]
    fn mark_delivered_reschedules_yearly_events_instead_of_closing_them() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        let now = MonotonicMs::from(0);
        let trigger = MonotonicMs::from(1_700_000_000_000);
        let event_id = s
            .add_event(EventKind::Birthday, "ada's birthday", &chat, trigger, Some(Recurrence::Yearly), now)
            .unwrap();

        let claimed = s.claim_pending_events(MonotonicMs::from(1_700_000_000_000), 0, 10, 60_000, "w1").unwrap();
        assert_eq!(claimed.len(), 1);

        s.mark_delivered(&event_id, "w1", MonotonicMs::from(1_700_000_000_000)).unwrap();

        let still_pending = s.claim_pending_events(MonotonicMs::from(1_700_000_000_000), 0, 10, 60_000, "w2").unwrap();
        assert!(still_pending.is_empty(), "a rescheduled yearly event should not be immediately due again");
    }

    #[test]
    fn release_claim_allows_immediate_reclaim() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        let now = MonotonicMs::from(1_000);
        let event_id = s.add_event(EventKind::Reminder, "x", &chat, MonotonicMs::from(500), None, now).unwrap();
        let claimed = s.claim_pending_events(now, 0, 10, 60_000, "w1").unwrap();
        assert_eq!(claimed.len(), 1);

        s.release_claim(&event_id, "w1").unwrap();

        let reclaimed = s.claim_pending_events(now, 0, 10, 60_000, "w2").unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[test]
    fn cancel_event_removes_it_even_while_unclaimed() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        let now = MonotonicMs::from(1_000);
        let event_id = s.add_event(EventKind::FollowUp, "check back", &chat, MonotonicMs::from(500_000), None, now).unwrap();

        s.cancel_event(&event_id).unwrap();

        let claimed = s.claim_pending_events(MonotonicMs::from(500_000), 0, 10, 60_000, "w1").unwrap();
        assert!(claimed.is_empty());
    }

    #[test]
    fn suppression_gate_fires_on_scope_cap() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        let limits = ScopeLimitsConfig {
            max_per_day: 1,
            max_per_week: 10,
            cooldown_after_user_ms: 0,
            pause_after_ignored: 99,
        };
        let now = MonotonicMs::from(10_000_000);
        s.log_proactive_send(&chat, None, now.minus_ms(1_000)).unwrap();

        let suppressed = s.should_suppress_proactive(&chat, false, now, None, &limits).unwrap();
        assert!(suppressed);
    }

    #[test]
    fn suppression_gate_fires_on_pause_after_ignored() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        let limits = ScopeLimitsConfig {
            max_per_day: 99,
            max_per_week: 99,
            cooldown_after_user_ms: 0,
            pause_after_ignored: 2,
        };
        let now = MonotonicMs::from(10_000_000);
        s.log_proactive_send(&chat, None, now.minus_ms(3_000)).unwrap();
        s.log_proactive_send(&chat, None, now.minus_ms(2_000)).unwrap();

        let suppressed = s.should_suppress_proactive(&chat, false, now, None, &limits).unwrap();
        assert!(suppressed);
    }

    #[test]
    fn mark_proactive_responded_clears_ignored_streak() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        let now = MonotonicMs::from(10_000_000);
        s.log_proactive_send(&chat, None, now.minus_ms(2_000)).unwrap();
        s.mark_proactive_responded(&chat).unwrap();

        assert_eq!(s.count_ignored_recent(&chat, 5).unwrap(), 0);
    }

    #[test]
    fn open_loop_upsert_bumps_mention_count() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        s.upsert_open_loop(
            &chat,
            "job_interview",
            "job interview",
            OpenLoopCategory::UpcomingEvent,
            EmotionalWeight::Medium,
            None,
            "\"I have an interview Friday\"",
            "How did the interview go?",
        )
        .unwrap();
        s.upsert_open_loop(
            &chat,
            "job_interview",
            "job interview",
            OpenLoopCategory::UpcomingEvent,
            EmotionalWeight::Medium,
            None,
            "\"Still nervous about it\"",
            "How are you feeling about the interview?",
        )
        .unwrap();

        let loops = s.list_open_loops_for_chat(&chat, OpenLoopStatus::Open).unwrap();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].mention_count, 2);
    }

    #[test]
    fn resolving_open_loop_returns_its_follow_up_event() {
        let s = scheduler();
        let chat = ChatId::from("telegram:1");
        s.upsert_open_loop(
            &chat,
            "interview",
            "interview",
            OpenLoopCategory::UpcomingEvent,
            EmotionalWeight::Medium,
            None,
            "\"quote\"",
            "question?",
        )
        .unwrap();
        let event_id = EventId::new();
        s.attach_follow_up_event_to_open_loop(&chat, "interview", &event_id).unwrap();

        let resolved = s.resolve_open_loop(&chat, "interview").unwrap();
        assert_eq!(resolved.unwrap().as_str(), event_id.as_str());

        let still_open = s.list_open_loops_for_chat(&chat, OpenLoopStatus::Open).unwrap();
        assert!(still_open.is_empty());
    }
}
