use serde_json::Value;

/// Dispatch-level error: either the cross-cutting taxonomy, or an ambiguous
/// id-prefix match carrying the candidates a caller needs to disambiguate.
#[derive(Debug)]
pub enum IpcError {
    Core(hiboss_core::HiBossError),
    Ambiguous { prefix: String, candidates: Vec<Value> },
}

impl From<hiboss_core::HiBossError> for IpcError {
    fn from(e: hiboss_core::HiBossError) -> Self {
        IpcError::Core(e)
    }
}

impl From<hiboss_store::StoreError> for IpcError {
    fn from(e: hiboss_store::StoreError) -> Self {
        IpcError::Core(e.into())
    }
}

impl From<hiboss_router::RouterError> for IpcError {
    fn from(e: hiboss_router::RouterError) -> Self {
        IpcError::Core(e.into())
    }
}

impl From<hiboss_scheduler::SchedulerError> for IpcError {
    fn from(e: hiboss_scheduler::SchedulerError) -> Self {
        IpcError::Core(e.into())
    }
}

impl IpcError {
    pub fn code(&self) -> &'static str {
        match self {
            IpcError::Core(e) => e.code(),
            IpcError::Ambiguous { .. } => "AMBIGUOUS",
        }
    }

    pub fn message(&self) -> String {
        match self {
            IpcError::Core(e) => e.to_string(),
            IpcError::Ambiguous { prefix, candidates } => {
                format!("ambiguous reference '{prefix}': {} matches", candidates.len())
            }
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            IpcError::Core(_) => None,
            IpcError::Ambiguous { candidates, .. } => Some(serde_json::json!({ "candidates": candidates })),
        }
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;
