use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("store error: {0}")]
    Store(#[from] hiboss_store::StoreError),

    #[error("router error: {0}")]
    Router(#[from] hiboss_router::RouterError),

    #[error("provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<ExecutorError> for hiboss_core::HiBossError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Store(inner) => inner.into(),
            ExecutorError::Router(inner) => inner.into(),
            ExecutorError::Provider(inner) => hiboss_core::HiBossError::Internal(inner.to_string()),
            ExecutorError::NotFound(msg) => hiboss_core::HiBossError::NotFound(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
