//! Markdown mirror (§4.G): consolidation writes human-readable snapshots of
//! capsules and lessons somewhere a human can read them without querying
//! SQLite directly. The concrete destination is an external concern — the
//! runtime wires a real sink; tests and default construction use
//! `NullMirrorSink`.

use vigil_core::ids::{ChatId, PersonId};

/// Where consolidation writes its markdown snapshots.
pub trait MirrorSink: Send + Sync {
    fn write_person_capsule(&self, person_id: &PersonId, display_name: &str, capsule: &str);
    fn write_group_capsule(&self, chat_id: &ChatId, capsule: &str);
    fn write_lessons(&self, rendered: &str);
}

/// Discards every write. Used when no mirror destination is configured.
#[derive(Debug, Default)]
pub struct NullMirrorSink;

impl MirrorSink for NullMirrorSink {
    fn write_person_capsule(&self, _person_id: &PersonId, _display_name: &str, _capsule: &str) {}
    fn write_group_capsule(&self, _chat_id: &ChatId, _capsule: &str) {}
    fn write_lessons(&self, _rendered: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_any_write_without_panicking() {
        let sink = NullMirrorSink;
        sink.write_person_capsule(&PersonId::new(), "Ada", "likes tea");
        sink.write_group_capsule(&ChatId::from("telegram:-1"), "relaxed vibe");
        sink.write_lessons("# Lessons\n");
    }
}
