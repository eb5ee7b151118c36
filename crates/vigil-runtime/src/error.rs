use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] vigil_core::error::ConfigError),

    #[error(transparent)]
    Memory(#[from] vigil_memory::MemoryError),

    #[error(transparent)]
    Scheduler(#[from] vigil_scheduler::SchedulerError),

    #[error("failed to create data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open {path}: {source}")]
    Database { path: String, #[source] source: rusqlite::Error },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
