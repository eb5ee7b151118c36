//! `vigil-scheduler` — the proactive event scheduler (§4.E): reminders,
//! birthdays, follow-ups and check-ins over their own SQLite database,
//! plus the open-loop tracker and send-rate accounting that gate them.
//!
//! # Claim protocol
//!
//! Events are claimed with a caller-supplied lease (`claimPendingEvents`),
//! delivered (`markDelivered`) or released (`releaseClaim`) by that same
//! claim id — the same atomic conditional-`UPDATE` shape the memory store
//! uses for its dirty queue, so multiple delivery workers can share one
//! `proactive.db` without double-sending an event.

pub mod db;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::EventScheduler;
pub use error::{Result, SchedulerError};
pub use types::{
    derive_is_group, normalize_subject_key, EmotionalWeight, EventKind, OpenLoop,
    OpenLoopCategory, OpenLoopStatus, ProactiveEvent, ProactiveLogEntry, Recurrence,
};
