use thiserror::Error;

/// §7: storage failures surface and abort the current consolidation step;
/// the loop itself continues to the next tick regardless. LLM/parse
/// failures inside a step are handled where they occur and never reach
/// here.
#[derive(Debug, Error)]
pub enum ConsolidateError {
    #[error(transparent)]
    Memory(#[from] vigil_memory::MemoryError),

    #[error(transparent)]
    Scheduler(#[from] vigil_scheduler::SchedulerError),

    #[error(transparent)]
    Extractor(#[from] vigil_extractor::ExtractorError),
}

pub type Result<T> = std::result::Result<T, ConsolidateError>;
