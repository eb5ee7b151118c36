//! Event-scheduler entities (§3: Proactive Event, Open Loop, Proactive Log
//! Entry, Dirty Queues — the scheduler owns the first three; the dirty
//! queues live in `vigil-memory` since they key off memory entities).

use serde::{Deserialize, Serialize};
use vigil_core::ids::{ChatId, EventId, OpenLoopId};
use vigil_core::time::MonotonicMs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Reminder,
    Birthday,
    FollowUp,
    CheckIn,
    Anticipated,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Reminder => "reminder",
            Self::Birthday => "birthday",
            Self::FollowUp => "follow_up",
            Self::CheckIn => "check_in",
            Self::Anticipated => "anticipated",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminder" => Ok(Self::Reminder),
            "birthday" => Ok(Self::Birthday),
            "follow_up" => Ok(Self::FollowUp),
            "check_in" => Ok(Self::CheckIn),
            "anticipated" => Ok(Self::Anticipated),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Once,
    Yearly,
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::Yearly => write!(f, "yearly"),
        }
    }
}

impl std::str::FromStr for Recurrence {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Self::Once),
            "yearly" => Ok(Self::Yearly),
            other => Err(format!("unknown recurrence: {other}")),
        }
    }
}

/// `(eventId, kind, subject, chatId, triggerAtMs, recurrence, delivered,
/// createdAtMs, claimId?, claimUntilMs?)`. Unique on `(chatId, kind,
/// subject, triggerAtMs, recurrence)` — `addEvent` dedupes on this tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveEvent {
    pub event_id: EventId,
    pub kind: EventKind,
    pub subject: String,
    pub chat_id: ChatId,
    pub trigger_at_ms: MonotonicMs,
    pub recurrence: Option<Recurrence>,
    pub delivered: bool,
    pub created_at_ms: MonotonicMs,
    pub claim_id: Option<String>,
    pub claim_until_ms: Option<MonotonicMs>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenLoopCategory {
    WaitingForOutcome,
    UpcomingEvent,
    ActiveDecision,
    SocialCommitment,
    OngoingEffort,
}

impl std::fmt::Display for OpenLoopCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WaitingForOutcome => "waiting_for_outcome",
            Self::UpcomingEvent => "upcoming_event",
            Self::ActiveDecision => "active_decision",
            Self::SocialCommitment => "social_commitment",
            Self::OngoingEffort => "ongoing_effort",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OpenLoopCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting_for_outcome" => Ok(Self::WaitingForOutcome),
            "upcoming_event" => Ok(Self::UpcomingEvent),
            "active_decision" => Ok(Self::ActiveDecision),
            "social_commitment" => Ok(Self::SocialCommitment),
            "ongoing_effort" => Ok(Self::OngoingEffort),
            other => Err(format!("unknown open loop category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalWeight {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for EmotionalWeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for EmotionalWeight {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown emotional weight: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenLoopStatus {
    Open,
    Resolved,
}

impl std::fmt::Display for OpenLoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for OpenLoopStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            other => Err(format!("unknown open loop status: {other}")),
        }
    }
}

/// Unique on `(chatId, subjectKey)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLoop {
    pub id: OpenLoopId,
    pub chat_id: ChatId,
    pub subject_key: String,
    pub subject: String,
    pub category: OpenLoopCategory,
    pub emotional_weight: EmotionalWeight,
    pub anchor_date_ms: Option<MonotonicMs>,
    pub evidence_quote: String,
    pub follow_up_question: String,
    pub mention_count: u32,
    pub status: OpenLoopStatus,
    pub follow_up_event_id: Option<EventId>,
}

/// Append-only; `responded` flips once when the next inbound from that
/// chat arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveLogEntry {
    pub chat_id: ChatId,
    pub sent_at_ms: MonotonicMs,
    pub responded: bool,
    pub proactive_event_id: Option<EventId>,
    pub is_group: bool,
}

/// Subject-key normalization for open-loop dedupe (§4.F step 7): lowercase
/// alphanumeric, collapsed whitespace, capped at 80 chars.
pub fn normalize_subject_key(subject: &str) -> String {
    let mut key: String = subject
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    key.truncate(80);
    key
}

/// Telegram-style convention: group/supergroup chat ids are negative.
/// Used to derive `isGroup` from a bare `chatId` (§4.E `logProactiveSend`).
pub fn derive_is_group(chat_id: &ChatId) -> bool {
    chat_id
        .as_str()
        .rsplit(':')
        .next()
        .and_then(|tail| tail.parse::<i64>().ok())
        .map(|n| n < 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_key_normalizes_case_and_punctuation() {
        assert_eq!(normalize_subject_key("Dentist Appointment!"), "dentist_appointment");
    }

    #[test]
    fn subject_key_truncates_to_80_chars() {
        let long = "a".repeat(200);
        assert_eq!(normalize_subject_key(&long).len(), 80);
    }

    #[test]
    fn group_chat_ids_are_negative() {
        assert!(derive_is_group(&ChatId::from("telegram:-100123")));
        assert!(!derive_is_group(&ChatId::from("telegram:582931")));
    }
}
