//! Per-agent session lifecycle, single-flight run coordination, and the
//! narrowed provider contract the daemon drives.

pub mod engine;
pub mod error;
pub mod provider;
pub mod session;

pub use engine::{Executor, REFRESH_REASON_MANUAL_NEW};
pub use error::{ExecutorError, Result};
pub use provider::{AgentProvider, EchoProvider, Message, Outcome, ProviderError, ProviderSession, Role, Usage};
