//! Entities of §3: Person, Fact, Episode, Lesson, Group Capsule,
//! Observation Counters, plus the tagged enums each carries.

use serde::{Deserialize, Serialize};
use vigil_core::ids::{ChannelUserId, ChatId, EpisodeId, FactId, LessonId, PersonId};
use vigil_core::time::MonotonicMs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for TrustTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown trust tier: {other}")),
        }
    }
}

/// Stable identity for a human correspondent (§3 Person).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub person_id: PersonId,
    pub display_name: String,
    pub channel: String,
    pub channel_user_id: ChannelUserId,
    pub relationship_score: f64,
    pub trust_tier_override: Option<TrustTier>,
    pub capsule: Option<String>,
    pub capsule_updated_at_ms: Option<MonotonicMs>,
    pub public_style_capsule: Option<String>,
    pub side_data: PersonSideData,
    pub created_at_ms: MonotonicMs,
    pub updated_at_ms: MonotonicMs,
}

/// Structured side-data, merge-with-cap on every write (§4.D).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonSideData {
    #[serde(default)]
    pub current_concerns: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub preferences: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub last_mood_signal: Option<String>,
    #[serde(default)]
    pub curiosity_questions: Vec<String>,
}

/// Cap applied to every array field of `PersonSideData` on merge (§4.D:
/// "arrays deduplicate and are truncated to 10 entries").
pub const SIDE_DATA_ARRAY_CAP: usize = 10;

impl PersonSideData {
    /// Merge `update` into `self`: arrays dedupe+truncate to
    /// `SIDE_DATA_ARRAY_CAP`, `preferences` shallow-merges,
    /// `last_mood_signal` overwrites when supplied.
    pub fn merge_with_cap(&mut self, update: &PersonSideData) {
        merge_capped_list(&mut self.current_concerns, &update.current_concerns);
        merge_capped_list(&mut self.goals, &update.goals);
        merge_capped_list(&mut self.curiosity_questions, &update.curiosity_questions);
        for (k, v) in &update.preferences {
            self.preferences.insert(k.clone(), v.clone());
        }
        if update.last_mood_signal.is_some() {
            self.last_mood_signal = update.last_mood_signal.clone();
        }
    }
}

fn merge_capped_list(base: &mut Vec<String>, incoming: &[String]) {
    for item in incoming {
        if !base.iter().any(|existing| existing == item) {
            base.push(item.clone());
        }
    }
    if base.len() > SIDE_DATA_ARRAY_CAP {
        let overflow = base.len() - SIDE_DATA_ARRAY_CAP;
        base.drain(0..overflow);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Preference,
    Personal,
    Plan,
    Professional,
    Relationship,
    Misc,
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preference => write!(f, "preference"),
            Self::Personal => write!(f, "personal"),
            Self::Plan => write!(f, "plan"),
            Self::Professional => write!(f, "professional"),
            Self::Relationship => write!(f, "relationship"),
            Self::Misc => write!(f, "misc"),
        }
    }
}

impl std::str::FromStr for FactCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "personal" => Ok(Self::Personal),
            "plan" => Ok(Self::Plan),
            "professional" => Ok(Self::Professional),
            "relationship" => Ok(Self::Relationship),
            "misc" => Ok(Self::Misc),
            other => Err(format!("unknown fact category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Factual,
    Preference,
    Experiential,
    Belief,
    Goal,
}

impl std::fmt::Display for FactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Factual => write!(f, "factual"),
            Self::Preference => write!(f, "preference"),
            Self::Experiential => write!(f, "experiential"),
            Self::Belief => write!(f, "belief"),
            Self::Goal => write!(f, "goal"),
        }
    }
}

impl std::str::FromStr for FactType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "factual" => Ok(Self::Factual),
            "preference" => Ok(Self::Preference),
            "experiential" => Ok(Self::Experiential),
            "belief" => Ok(Self::Belief),
            "goal" => Ok(Self::Goal),
            other => Err(format!("unknown fact type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalScope {
    Current,
    Past,
    Future,
    Unknown,
}

impl std::fmt::Display for TemporalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Past => write!(f, "past"),
            Self::Future => write!(f, "future"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for TemporalScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(Self::Current),
            "past" => Ok(Self::Past),
            "future" => Ok(Self::Future),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown temporal scope: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    /// §4.C: `confidenceBoost = +0.04 / 0 / -0.04` for `high / medium / low`.
    pub fn boost(self) -> f64 {
        match self {
            ConfidenceTier::High => 0.04,
            ConfidenceTier::Medium => 0.0,
            ConfidenceTier::Low => -0.04,
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for ConfidenceTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown confidence tier: {other}")),
        }
    }
}

/// An atomic, present-tense claim about a Person (or unowned) (§3 Fact).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: FactId,
    pub person_id: Option<PersonId>,
    pub subject: String,
    pub content: String,
    pub category: FactCategory,
    pub fact_type: FactType,
    pub temporal_scope: TemporalScope,
    /// Exact substring of the originating user text (≤200 chars).
    pub evidence_quote: String,
    pub confidence_tier: ConfidenceTier,
    pub is_current: bool,
    pub last_accessed_at_ms: MonotonicMs,
    pub created_at_ms: MonotonicMs,
}

/// A single logged conversational turn or observation (§3 Episode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: EpisodeId,
    pub chat_id: ChatId,
    pub person_id: Option<PersonId>,
    pub is_group: bool,
    pub content: String,
    pub last_extracted_at_ms: Option<MonotonicMs>,
    pub created_at_ms: MonotonicMs,
}

/// A behavioral observation or heuristic (§3 Lesson).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_id: LessonId,
    pub category: String,
    pub lesson_type: Option<String>,
    pub content: String,
    pub rule: Option<String>,
    pub alternative: Option<String>,
    pub person_id: Option<PersonId>,
    pub episode_refs: Vec<EpisodeId>,
    pub confidence: Option<f64>,
    pub times_validated: u32,
    pub times_violated: u32,
    pub promoted: bool,
    pub created_at_ms: MonotonicMs,
}

impl Lesson {
    /// §3: "a lesson becomes `promoted` when `timesValidated >= 2 AND
    /// timesViolated <= 1`".
    pub fn should_be_promoted(&self) -> bool {
        self.times_validated >= 2 && self.times_violated <= 1
    }
}

/// Per-`chatId` short digest of group norms (§3 Group Capsule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCapsule {
    pub chat_id: ChatId,
    pub capsule: String,
    pub updated_at_ms: MonotonicMs,
}

/// Per-Person incremental statistics (§3 Observation Counters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationCounters {
    pub person_id: PersonId,
    pub avg_response_len: f64,
    pub avg_incoming_len: f64,
    /// Bitmask of active hours (bit N set => activity observed in UTC hour N).
    pub active_hours_mask: u32,
    pub conversation_count: u32,
    pub sample_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_data_merge_dedupes_and_caps() {
        let mut base = PersonSideData::default();
        for i in 0..8 {
            base.goals.push(format!("goal-{i}"));
        }
        let mut update = PersonSideData::default();
        update.goals = vec!["goal-0".to_string(), "goal-new-1".to_string(), "goal-new-2".to_string(), "goal-new-3".to_string()];
        base.merge_with_cap(&update);
        assert_eq!(base.goals.len(), SIDE_DATA_ARRAY_CAP);
        // oldest entries are dropped first once the cap is exceeded
        assert!(!base.goals.contains(&"goal-0".to_string()) || base.goals.len() <= SIDE_DATA_ARRAY_CAP);
        assert!(base.goals.contains(&"goal-new-3".to_string()));
    }

    #[test]
    fn side_data_preferences_shallow_merge() {
        let mut base = PersonSideData::default();
        base.preferences.insert("diet".to_string(), "vegetarian".to_string());
        let mut update = PersonSideData::default();
        update.preferences.insert("diet".to_string(), "vegan".to_string());
        update.preferences.insert("tz".to_string(), "UTC".to_string());
        base.merge_with_cap(&update);
        assert_eq!(base.preferences.get("diet").unwrap(), "vegan");
        assert_eq!(base.preferences.get("tz").unwrap(), "UTC");
    }

    #[test]
    fn lesson_promotion_invariant() {
        let mut lesson = Lesson {
            lesson_id: LessonId(1),
            category: "style".to_string(),
            lesson_type: None,
            content: "prefers terse replies".to_string(),
            rule: None,
            alternative: None,
            person_id: None,
            episode_refs: vec![],
            confidence: None,
            times_validated: 1,
            times_violated: 0,
            promoted: false,
            created_at_ms: MonotonicMs(0),
        };
        assert!(!lesson.should_be_promoted());
        lesson.times_validated = 2;
        assert!(lesson.should_be_promoted());
        lesson.times_violated = 2;
        assert!(!lesson.should_be_promoted());
    }
}
