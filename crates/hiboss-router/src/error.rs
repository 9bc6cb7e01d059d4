use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("store error: {0}")]
    Store(#[from] hiboss_store::StoreError),

    #[error("adapter error: {0}")]
    Adapter(#[from] hiboss_channels::AdapterError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] hiboss_scheduler::SchedulerError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error("{0}")]
    Unauthorized(String),
}

impl From<RouterError> for hiboss_core::HiBossError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::Store(inner) => inner.into(),
            RouterError::Adapter(inner) => hiboss_core::HiBossError::AdapterFailure {
                adapter: "unknown".to_string(),
                reason: inner.to_string(),
            },
            RouterError::Scheduler(inner) => inner.into(),
            RouterError::InvalidInput(msg) => hiboss_core::HiBossError::InvalidInput(msg),
            RouterError::UnknownAdapter(name) => {
                hiboss_core::HiBossError::InvalidInput(format!("unknown adapter: {name}"))
            }
            RouterError::Unauthorized(msg) => hiboss_core::HiBossError::Unauthorized(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
