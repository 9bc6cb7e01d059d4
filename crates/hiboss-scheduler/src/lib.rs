//! Tick-loop scheduler driving due-envelope delivery, agent triggering, and
//! cron materialization over the shared SQLite-backed store.
//!
//! The engine owns no domain logic of its own: it asks the store what is
//! due and forwards the work through the [`engine::ChannelDispatcher`] and
//! [`engine::AgentTrigger`] traits, which the router and executor implement.
//! This keeps the scheduler beneath both in the dependency graph.

pub mod engine;
pub mod error;
pub mod materializer;
pub mod schedule;

pub use engine::{AgentTrigger, ChannelDispatcher, SchedulerEngine, SchedulerWaker};
pub use error::{Result, SchedulerError};
pub use schedule::{compute_next_fire, resolve_timezone};
