use async_trait::async_trait;
use hiboss_core::types::Envelope;

use crate::{error::AdapterError, types::ChannelStatus};

/// Common interface implemented by every chat adapter (Telegram, Discord, …).
///
/// Only the contract is specified here — no concrete adapter ships in this
/// workspace. Implementations must be `Send + Sync` so they can be stored in
/// a [`crate::manager::ChannelManager`] and driven from multiple Tokio tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this adapter (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Establish the connection to the external service.
    async fn start(&mut self) -> Result<(), AdapterError>;

    /// Gracefully close the connection.
    async fn stop(&mut self) -> Result<(), AdapterError>;

    /// Deliver an outbound envelope's content to the channel.
    ///
    /// `&self` (shared reference) so a connected adapter can send
    /// concurrently without a mutable borrow.
    async fn send(&self, envelope: &Envelope) -> Result<(), AdapterError>;

    /// React to a previously sent/received message. `message_id` accepts
    /// either base36 or `dec:<n>` form (see [`crate::types::parse_message_id`]).
    async fn react(&self, message_id: &str, emoji: &str) -> Result<(), AdapterError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}
