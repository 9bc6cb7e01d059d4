pub mod channel;
pub mod error;
pub mod manager;
pub mod types;

pub use channel::Channel;
pub use error::AdapterError;
pub use manager::ChannelManager;
pub use types::{format_message_id, parse_message_id, ChannelStatus, InboundEvent};
