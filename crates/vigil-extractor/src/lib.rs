//! Memory extraction (§4.F): turns a logged episode into facts, scheduled
//! events, and open loops, reconciling against what's already on file and
//! degrading gracefully whenever the extraction LLM misbehaves.

pub mod error;
pub mod gates;
pub mod pipeline;
pub mod reconcile;
pub mod schema;
pub mod scheduling;

pub use error::{ExtractorError, Result};
pub use pipeline::{ExtractionSummary, MemoryExtractor};
