//! Collaborator interfaces consumed by the core (§6): `LLMBackend` and
//! `Embedder`. No concrete provider ships in this workspace — adapters are
//! an external concern (§1) — so `vigil-extractor` and `vigil-consolidate`
//! are generic over `Arc<dyn LlmBackend>` / `Option<Arc<dyn Embedder>>`.
//!
//! Shape grounded on the teacher's `skynet-agent::provider::LlmProvider`
//! trait (single `send` method, typed error enum), generalized to the
//! role/cancellation contract §6 specifies.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use crate::error::LlmError;

/// Which model tier a completion call should use. §4.F: extraction and
/// verification use `Fast`; consolidation may use `Default` or `Fast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Default,
    Fast,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub role: ModelRole,
    pub messages: Vec<ChatMessage>,
    /// Maximum tool-use/generation steps (§4.F: `maxSteps=2` for extraction).
    pub max_steps: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
}

/// `LLMBackend.complete({role, messages, maxSteps, signal}) -> { text }`.
/// Cancellation is mandatory (§5: "All outbound LLM calls ... are bounded
/// by a caller-supplied cancellation token").
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(
        &self,
        req: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionResponse, LlmError>;
}

/// `Embedder.{dims, embed(text)->Vector<f32>, embedBatch(texts)->Vec<Vector<f32>>}`.
/// Optional collaborator — when absent, retrieval degrades to lexical-only
/// (§3 invariant 4, §4.C).
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dims(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}
