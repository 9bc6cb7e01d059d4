use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unsupported schema version {found}, expected {expected}")]
    SchemaVersion { found: i64, expected: i64 },
}

impl From<StoreError> for hiboss_core::HiBossError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(inner) => hiboss_core::HiBossError::Database(inner),
            StoreError::Serialization(inner) => hiboss_core::HiBossError::Serialization(inner),
            StoreError::NotFound(s) => hiboss_core::HiBossError::NotFound(s),
            StoreError::AlreadyExists(s) => hiboss_core::HiBossError::AlreadyExists(s),
            StoreError::SchemaVersion { found, expected } => hiboss_core::HiBossError::Internal(
                format!("unsupported schema version {found}, expected {expected}"),
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
