//! Validates and persists envelopes, enforces the addressing invariants,
//! and dispatches immediate work to channel adapters or the Executor.
//!
//! Implements [`hiboss_scheduler::ChannelDispatcher`] so the Scheduler can
//! deliver due channel envelopes without depending on this crate directly.

pub mod deliver_at;
pub mod error;
pub mod route;

pub use deliver_at::parse_deliver_at;
pub use error::{Result, RouterError};
pub use route::{fail_missing_agent_envelopes, Router};
