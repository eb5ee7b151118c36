use thiserror::Error;

/// §7: "invalid/out-of-range config at load. Fatal; abort startup."
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("config value out of range: {field} = {value} ({constraint})")]
    OutOfRange {
        field: String,
        value: String,
        constraint: String,
    },

    #[error("path {field} escapes the project directory: {path}")]
    PathEscape { field: String, path: String },
}

/// §7: `LLMError.{transient | permanent | cancelled}`.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transient LLM error: {0}")]
    Transient(String),

    #[error("permanent LLM error: {0}")]
    Permanent(String),

    #[error("LLM call cancelled")]
    Cancelled,
}

/// Umbrella error unifying the per-crate taxonomies at the composition
/// root. Individual crates (`vigil-memory`, `vigil-scheduler`, ...) define
/// their own `thiserror` enums per §7 and are folded in here via `#[from]`
/// by `vigil-runtime`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
