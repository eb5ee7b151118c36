//! `vigil-core` — shared identifiers, time, configuration, error taxonomy,
//! and LLM collaborator contracts for the Vigil memory/scheduling core.

pub mod config;
pub mod error;
pub mod ids;
pub mod llm;
pub mod time;

pub use error::{ConfigError, CoreError, Result};
pub use time::MonotonicMs;
