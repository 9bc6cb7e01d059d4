use thiserror::Error;

/// Cross-cutting error taxonomy. Every subsystem crate maps its own
/// `thiserror` enum into this one at its boundary with `hiboss-ipc`.
#[derive(Debug, Error)]
pub enum HiBossError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("ambiguous reference '{prefix}': {count} matches")]
    Ambiguous { prefix: String, count: usize },

    #[error("busy: {0}")]
    Busy(String),

    #[error("adapter failure ({adapter}): {reason}")]
    AdapterFailure { adapter: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HiBossError {
    /// Wire error code sent back over IPC, per the external interface spec.
    pub fn code(&self) -> &'static str {
        match self {
            HiBossError::InvalidInput(_) => "INVALID_PARAMS",
            HiBossError::Unauthorized(_) => "UNAUTHORIZED",
            HiBossError::NotFound(_) => "NOT_FOUND",
            HiBossError::AlreadyExists(_) => "ALREADY_EXISTS",
            HiBossError::Ambiguous { .. } => "AMBIGUOUS",
            HiBossError::Busy(_) => "BUSY",
            HiBossError::AdapterFailure { .. } => "ADAPTER_FAILURE",
            HiBossError::Database(_) => "INTERNAL",
            HiBossError::Config(_) => "INTERNAL",
            HiBossError::Serialization(_) => "INTERNAL",
            HiBossError::Io(_) => "INTERNAL",
            HiBossError::Internal(_) => "INTERNAL",
        }
    }
}

pub type Result<T> = std::result::Result<T, HiBossError>;
