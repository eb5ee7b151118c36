//! Opaque typed identifiers for every entity in the data model (§3).
//!
//! Two minting strategies are in play. `PersonId` and `EventId` are minted
//! up front, independent of storage, so they use UUIDv7 — time-sortable,
//! which keeps log correlation cheap. `FactId`, `EpisodeId` and `LessonId`
//! are row ids: §5's ordering guarantee ("Episode appends are totally
//! ordered by the SQLite AUTOINCREMENT id; `createdAtMs` may tie and is not
//! a reliable order key on its own") only holds if the id *is* the
//! `AUTOINCREMENT` rowid, so those three wrap `i64` and are only ever
//! constructed from a row that storage has already assigned. Ids that name
//! something external (a chat, a channel user) are plain newtypes over
//! caller-supplied strings and are never constructed internally.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! minted_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Mint a fresh, time-sortable id.
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

macro_rules! external_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

macro_rules! row_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

minted_id!(PersonId, "Stable identity for a human correspondent (§3 Person).");
minted_id!(EventId, "A proactive event (§3 Proactive Event).");

row_id!(FactId, "AUTOINCREMENT row id of an atomic, evidenced claim (§3 Fact).");
row_id!(
    EpisodeId,
    "AUTOINCREMENT row id of a logged conversational turn (§3 Episode). \
     Doubles as the total order over episode appends (§5)."
);
row_id!(LessonId, "AUTOINCREMENT row id of a behavioral observation (§3 Lesson).");

external_id!(ChatId, "Channel-defined chat/conversation identifier.");
external_id!(
    ChannelUserId,
    "Channel-defined user identifier; unique-index lookup key for Person."
);

/// Row id of an open loop. SQLite `AUTOINCREMENT`, wrapped so it is never
/// confused with an `EventId` even though both are ultimately integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenLoopId(pub i64);

impl From<i64> for OpenLoopId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl fmt::Display for OpenLoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_time_sortable_uuids() {
        let a = PersonId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = PersonId::new();
        assert!(a.as_str() < b.as_str(), "uuidv7 ids should sort by mint time");
    }

    #[test]
    fn external_ids_roundtrip_from_str() {
        let chat: ChatId = "telegram:-100123".into();
        assert_eq!(chat.as_str(), "telegram:-100123");
        assert_eq!(chat.to_string(), "telegram:-100123");
    }
}
