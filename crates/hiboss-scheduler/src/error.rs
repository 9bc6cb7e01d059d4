use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] hiboss_store::StoreError),

    /// Normalized per spec: `"Invalid cron: <expr> (<reason>)"`.
    #[error("Invalid cron: {expr} ({reason})")]
    InvalidCron { expr: String, reason: String },

    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("cron schedule not found: {0}")]
    NotFound(String),
}

impl From<SchedulerError> for hiboss_core::HiBossError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Store(inner) => inner.into(),
            SchedulerError::InvalidCron { expr, reason } => {
                hiboss_core::HiBossError::InvalidInput(format!("Invalid cron: {expr} ({reason})"))
            }
            SchedulerError::InvalidTimezone(tz) => {
                hiboss_core::HiBossError::InvalidInput(format!("unknown timezone: {tz}"))
            }
            SchedulerError::NotFound(id) => hiboss_core::HiBossError::NotFound(id),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
