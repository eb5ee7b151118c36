use thiserror::Error;

/// §7: `StorageError.{io | migrate | integrity}`, plus the store-level
/// not-found case used by operator-facing lookups.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("storage I/O error: {0}")]
    Io(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migrate(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("no such {entity}: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// §7: `RetrievalError` — "degrades silently to FTS-only; never
/// propagates." Kept as a distinct type so call sites are forced to decide
/// how to degrade rather than accidentally bubbling it up.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector store unavailable: {0}")]
    VectorUnavailable(String),
}
