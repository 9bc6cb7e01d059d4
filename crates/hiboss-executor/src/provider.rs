//! The provider contract: open/resume/run-turn/dispose, the shape this
//! system actually drives. Concrete SDK-backed providers (Anthropic,
//! OpenAI, ...) are out of scope; this crate ships the trait plus an
//! in-memory double used by its tests.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Token/context accounting reported by a provider after a turn. Absent
/// fields mean "the provider didn't say" — callers must not guess.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub context_length: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub response: String,
    pub usage: Usage,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Opens or resumes provider sessions for an agent.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn open_session(&self, agent_name: &str) -> Result<Box<dyn ProviderSession>, ProviderError>;

    /// Resume a previously persisted session handle. Implementations should
    /// fail cleanly (not panic) on an unrecognised or expired handle so the
    /// caller can fall back to `open_session`.
    async fn resume_session(
        &self,
        agent_name: &str,
        handle: &str,
    ) -> Result<Box<dyn ProviderSession>, ProviderError>;
}

/// A live conversation with a provider. One per agent, never shared across
/// concurrent runs (the Executor's single-flight lock guarantees this).
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn run_turn(&mut self, messages: Vec<Message>) -> Result<Outcome, ProviderError>;

    /// Opaque handle snapshot persisted to `agent.metadata.sessionHandle`
    /// after each successful turn, so a restart can attempt to resume.
    fn handle(&self) -> String;

    async fn dispose(self: Box<Self>);
}

/// In-memory session double: echoes the concatenated turn content back and
/// never reports a context length. Exercises the Executor's lifecycle
/// without depending on a real provider SDK.
pub struct EchoProvider;

struct EchoSession {
    id: String,
    turns: u32,
}

#[async_trait]
impl AgentProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn open_session(&self, agent_name: &str) -> Result<Box<dyn ProviderSession>, ProviderError> {
        Ok(Box::new(EchoSession {
            id: format!("echo:{agent_name}:{}", uuid::Uuid::new_v4()),
            turns: 0,
        }))
    }

    async fn resume_session(
        &self,
        _agent_name: &str,
        handle: &str,
    ) -> Result<Box<dyn ProviderSession>, ProviderError> {
        Ok(Box::new(EchoSession {
            id: handle.to_string(),
            turns: 0,
        }))
    }
}

#[async_trait]
impl ProviderSession for EchoSession {
    async fn run_turn(&mut self, messages: Vec<Message>) -> Result<Outcome, ProviderError> {
        self.turns += 1;
        let joined = messages
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Outcome {
            response: format!("echo: {joined}"),
            usage: Usage::default(),
        })
    }

    fn handle(&self) -> String {
        self.id.clone()
    }

    async fn dispose(self: Box<Self>) {}
}
