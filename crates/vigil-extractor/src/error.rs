use thiserror::Error;

/// §7: storage failures from the collaborators this pipeline drives
/// surface and fail the turn; LLM/parse failures never reach here — they
/// degrade in place (see `pipeline`'s module docs) and are only logged.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error(transparent)]
    Memory(#[from] vigil_memory::MemoryError),

    #[error(transparent)]
    Scheduler(#[from] vigil_scheduler::SchedulerError),
}

pub type Result<T> = std::result::Result<T, ExtractorError>;
