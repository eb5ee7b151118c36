//! `ProactiveSink`: where a claimed, due proactive event actually goes.
//! Channel adapters are an external concern, so the claim-and-deliver
//! loop hands delivery off through this trait instead of owning a
//! transport itself — same seam shape as `vigil_memory::mirror::MirrorSink`
//! and `vigil_concurrency::typing::TypingSink`.

use vigil_scheduler::types::ProactiveEvent;

pub trait ProactiveSink: Send + Sync {
    fn deliver(&self, event: &ProactiveEvent);
}

/// Logs and discards. Used when no outbound channel is wired up.
#[derive(Debug, Default)]
pub struct LoggingProactiveSink;

impl ProactiveSink for LoggingProactiveSink {
    fn deliver(&self, event: &ProactiveEvent) {
        tracing::info!(event_id = %event.event_id, chat_id = %event.chat_id, kind = %event.kind, "proactive event due (no sink wired)");
    }
}
