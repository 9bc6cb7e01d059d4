use hiboss_core::types::Content;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// An inbound event published by an adapter, before the Router wraps it
/// into an [`hiboss_core::types::Envelope`] addressed `channel:<adapter>:<chat-id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Logical adapter name (e.g. "telegram").
    pub adapter: String,
    /// Platform-native chat/conversation identifier.
    pub chat_id: String,
    /// Display name of the sender, if the platform provides one.
    pub sender_display_name: Option<String>,
    pub content: Content,
    /// Platform-native message id, used later for `react`.
    pub message_id: String,
}

/// Runtime connection state of an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// Render a numeric platform message id as compact base36 — the form
/// Telegram ids are displayed in.
pub fn format_message_id(id: u64) -> String {
    to_base36(id)
}

/// Accept either a bare base36 id or the `dec:<n>` escape hatch for a
/// decimal id, per the reaction API's dual-form contract.
pub fn parse_message_id(s: &str) -> Result<u64, AdapterError> {
    if let Some(rest) = s.strip_prefix("dec:") {
        return rest
            .parse()
            .map_err(|_| AdapterError::BadMessageId(s.to_string()));
    }
    from_base36(s).ok_or_else(|| AdapterError::BadMessageId(s.to_string()))
}

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

fn from_base36(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for c in s.chars() {
        let digit = c.to_digit(36)? as u64;
        value = value.checked_mul(36)?.checked_add(digit)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_roundtrip() {
        for n in [0u64, 1, 35, 36, 12345, u32::MAX as u64] {
            let encoded = format_message_id(n);
            assert_eq!(parse_message_id(&encoded).unwrap(), n);
        }
    }

    #[test]
    fn dec_prefix_accepted() {
        assert_eq!(parse_message_id("dec:42").unwrap(), 42);
    }

    #[test]
    fn malformed_id_rejected() {
        assert!(parse_message_id("not-an-id!!").is_err());
    }
}
