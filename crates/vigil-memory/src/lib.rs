//! `vigil-memory` — the durable memory store (§3, §4.B–§4.D): people,
//! facts, episodes, lessons and capsules over SQLite, with hybrid
//! lexical+vector retrieval and a lease-based dirty queue driving
//! consolidation.

pub mod db;
pub mod error;
pub mod manager;
pub mod mirror;
pub mod retrieval;
pub mod types;

pub use error::{MemoryError, Result};
pub use manager::{DirtyClaim, MemoryStore};
pub use mirror::{MirrorSink, NullMirrorSink};
