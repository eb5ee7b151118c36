use thiserror::Error;

/// §7: `SchedulerError.{io | integrity}`, plus the store-level not-found
/// case used by operator-facing lookups.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("storage I/O error: {0}")]
    Io(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migrate(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("no such {entity}: {id}")]
    NotFound { entity: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
