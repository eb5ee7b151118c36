//! `vigil-runtime` — the composition root (§6): wires `vigil-memory`,
//! `vigil-scheduler`, `vigil-extractor`, `vigil-consolidate`, and
//! `vigil-concurrency` behind one process-wide handle, and owns the two
//! long-lived background tasks (the consolidation ticker and the
//! scheduler claim-and-deliver loop). Channel adapters, CLI argument
//! parsing, and identity-prompt composition are external concerns this
//! crate never implements — it exposes the collaborator surface of §6
//! for an outer layer to drive.

pub mod app;
pub mod delivery;
pub mod error;
pub mod sink;
pub mod telemetry;

pub use app::{AppState, BackgroundHandles};
pub use error::{Result, RuntimeError};
pub use sink::{LoggingProactiveSink, ProactiveSink};
