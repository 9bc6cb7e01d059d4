use thiserror::Error;

/// Errors that can occur within any adapter implementation.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("malformed message id: {0}")]
    BadMessageId(String),
}
