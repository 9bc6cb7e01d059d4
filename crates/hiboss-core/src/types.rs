use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HiBossError, Result};

/// Reserved metadata key marking an envelope as cron-materialized.
pub const META_CRON_SCHEDULE_ID: &str = "cronScheduleId";
/// Reserved metadata key overriding the display name of the sender.
pub const META_FROM_NAME: &str = "fromName";
/// Reserved metadata key carrying an agent's persisted provider session handle.
pub const META_SESSION_HANDLE: &str = "sessionHandle";
/// Reserved metadata key recording the terminal delivery failure on an envelope.
pub const META_LAST_DELIVERY_ERROR: &str = "lastDeliveryError";

const RESERVED_METADATA_KEYS: &[&str] = &[
    META_CRON_SCHEDULE_ID,
    META_FROM_NAME,
    META_SESSION_HANDLE,
    META_LAST_DELIVERY_ERROR,
];

/// Reserved agent name — a placeholder destination that can never be registered.
pub const RESERVED_AGENT_NAME: &str = "background";

/// Opaque entity id — UUIDv4, rendered as 32 lowercase hex chars (no hyphens).
///
/// Short ids are the first 8 hex chars; any unique longer prefix is also
/// accepted on input (see `hiboss-store`'s prefix lookup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(pub Uuid);

impl EnvelopeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Compact lowercase-hex form used as the storage key and wire id.
    pub fn to_hex(self) -> String {
        self.0.simple().to_string()
    }

    /// First 8 hex chars — the display "short id".
    pub fn short(self) -> String {
        self.to_hex()[..8].to_string()
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cleaned = s.replace('-', "");
        Uuid::parse_str(&cleaned)
            .map(Self)
            .map_err(|_| HiBossError::InvalidInput(format!("not a valid envelope id: {s}")))
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Tagged destination/source: an agent inbox/outbox, or a channel chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Agent { name: String },
    Channel { adapter: String, chat_id: String },
}

impl Address {
    pub fn agent(name: impl Into<String>) -> Self {
        Address::Agent { name: name.into() }
    }

    pub fn channel(adapter: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Address::Channel {
            adapter: adapter.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Address::Channel { .. })
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Address::Agent { .. })
    }

    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Address::Agent { name } => Some(name),
            Address::Channel { .. } => None,
        }
    }

    pub fn adapter(&self) -> Option<&str> {
        match self {
            Address::Channel { adapter, .. } => Some(adapter),
            Address::Agent { .. } => None,
        }
    }

    /// Canonical wire form: `agent:<name>` or `channel:<adapter>:<chat-id>`.
    pub fn format(&self) -> String {
        match self {
            Address::Agent { name } => format!("agent:{name}"),
            Address::Channel { adapter, chat_id } => format!("channel:{adapter}:{chat_id}"),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Validate an agent name against `^[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*$`.
pub fn is_valid_agent_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let mut prev_was_sep = false;
    let mut saw_char = false;
    for (i, c) in name.char_indices() {
        if c == '-' {
            // no leading/trailing/consecutive hyphens
            if i == 0 || prev_was_sep || !saw_char {
                return false;
            }
            prev_was_sep = true;
        } else if c.is_ascii_alphanumeric() {
            prev_was_sep = false;
            saw_char = true;
        } else {
            return false;
        }
    }
    saw_char && !prev_was_sep
}

/// Parse `agent:<name>` / `channel:<adapter>:<chat-id>` into an [`Address`].
pub fn parse_address(s: &str) -> Result<Address> {
    if let Some(rest) = s.strip_prefix("agent:") {
        if rest.is_empty() {
            return Err(HiBossError::InvalidInput(format!("empty agent name in address: {s}")));
        }
        return Ok(Address::Agent {
            name: rest.to_string(),
        });
    }
    if let Some(rest) = s.strip_prefix("channel:") {
        let mut parts = rest.splitn(2, ':');
        let adapter = parts.next().unwrap_or_default();
        let chat_id = parts.next().unwrap_or_default();
        if adapter.is_empty() || chat_id.is_empty() {
            return Err(HiBossError::InvalidInput(format!(
                "malformed channel address: {s}"
            )));
        }
        return Ok(Address::Channel {
            adapter: adapter.to_string(),
            chat_id: chat_id.to_string(),
        });
    }
    Err(HiBossError::InvalidInput(format!("unrecognised address: {s}")))
}

/// Inverse of [`parse_address`] — canonical wire form of an [`Address`].
pub fn format_address(address: &Address) -> String {
    address.format()
}

/// Source classification derived from `from` / metadata, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeSource {
    Channel,
    Cron,
    Agent,
}

/// Where an attachment's bytes actually live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentSource {
    LocalPath { path: String },
    Url { url: String },
    TelegramFileId { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub source: AttachmentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Status of an envelope. Transitions are one-way: `Pending -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Pending,
    Done,
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeStatus::Pending => write!(f, "pending"),
            EnvelopeStatus::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for EnvelopeStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EnvelopeStatus::Pending),
            "done" => Ok(EnvelopeStatus::Done),
            other => Err(format!("unknown envelope status: {other}")),
        }
    }
}

/// Opaque metadata bag. Reserved keys are validated on construction;
/// arbitrary adapter-specific keys live alongside them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub BTreeMap<String, serde_json::Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Reject user-supplied metadata that tries to set a reserved key.
    /// Callers that legitimately need to set one (the Router/Scheduler
    /// internals) build the map directly instead of going through this gate.
    pub fn reject_reserved(&self) -> Result<()> {
        for key in RESERVED_METADATA_KEYS {
            if self.0.contains_key(*key) {
                return Err(HiBossError::InvalidInput(format!(
                    "metadata key '{key}' is reserved"
                )));
            }
        }
        Ok(())
    }

    pub fn cron_schedule_id(&self) -> Option<&str> {
        self.get_str(META_CRON_SCHEDULE_ID)
    }
}

/// The durable unit of messaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub from: Address,
    pub to: Address,
    pub from_boss: bool,
    pub content: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<EnvelopeId>,
    /// Unix-ms UTC. `None` means "deliver immediately".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_at: Option<i64>,
    pub status: EnvelopeStatus,
    pub created_at: i64,
    pub metadata: Metadata,
}

impl Envelope {
    /// Source classification, derived per spec: channel > cron > agent.
    pub fn source(&self) -> EnvelopeSource {
        if self.from.is_channel() {
            EnvelopeSource::Channel
        } else if self.metadata.cron_schedule_id().is_some() {
            EnvelopeSource::Cron
        } else {
            EnvelopeSource::Agent
        }
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.status == EnvelopeStatus::Pending && self.deliver_at.map(|d| d <= now_ms).unwrap_or(true)
    }

    /// `(COALESCE(deliver_at, created_at), created_at)` ordering key.
    pub fn order_key(&self) -> (i64, i64) {
        (self.deliver_at.unwrap_or(self.created_at), self.created_at)
    }
}

/// Input to `Store::create_envelope` / `Router::route_envelope`.
#[derive(Debug, Clone)]
pub struct EnvelopeInput {
    pub from: Address,
    pub to: Address,
    pub from_boss: bool,
    pub content: Content,
    pub reply_to: Option<EnvelopeId>,
    pub deliver_at: Option<i64>,
    pub metadata: Metadata,
}

/// Ordered permission hierarchy gating IPC methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Restricted,
    Standard,
    Privileged,
    Boss,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionLevel::Restricted => "restricted",
            PermissionLevel::Standard => "standard",
            PermissionLevel::Privileged => "privileged",
            PermissionLevel::Boss => "boss",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PermissionLevel {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "restricted" => Ok(PermissionLevel::Restricted),
            "standard" => Ok(PermissionLevel::Standard),
            "privileged" => Ok(PermissionLevel::Privileged),
            "boss" => Ok(PermissionLevel::Boss),
            other => Err(format!("unknown permission level: {other}")),
        }
    }
}

/// Per-agent provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub auto_level: Option<String>,
}

/// Per-agent session lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Wall-clock "HH:MM" (boss timezone) at which the session is force-refreshed.
    pub daily_reset_at: Option<String>,
    /// Seconds of inactivity after which the session is refreshed.
    pub idle_timeout_secs: Option<u64>,
    pub max_context_length: Option<u64>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            daily_reset_at: None,
            idle_timeout_secs: None,
            max_context_length: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub token: String,
    pub description: Option<String>,
    pub workspace: Option<String>,
    pub provider: ProviderConfig,
    pub permission_level: PermissionLevel,
    pub session_policy: SessionPolicy,
    pub metadata: Metadata,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub agent_name: String,
    pub adapter_type: String,
    pub adapter_token: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronScheduleTemplate {
    pub to: Address,
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    pub id: Uuid,
    pub owner_agent: String,
    pub cron: String,
    pub timezone: Option<String>,
    pub enabled: bool,
    pub pending_envelope_id: Option<EnvelopeId>,
    pub template: CronScheduleTemplate,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub agent_name: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub processed_envelope_ids: Vec<EnvelopeId>,
    pub final_response: Option<String>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub context_length: Option<u64>,
}

/// The Store's singleton `Config` row (spec §3): boss identity, per-adapter
/// boss ids, memory settings, permission policy, and setup progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConfig {
    pub boss_name: Option<String>,
    pub boss_timezone: String,
    pub boss_token_hash: Option<String>,
    /// adapter_type -> the boss's own identifier on that adapter.
    pub adapter_boss_ids: BTreeMap<String, String>,
    pub memory_settings: serde_json::Value,
    pub permission_policy: crate::config::PermissionPolicy,
    pub setup_completed: bool,
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self {
            boss_name: None,
            boss_timezone: crate::config::DEFAULT_TIMEZONE.to_string(),
            boss_token_hash: None,
            adapter_boss_ids: BTreeMap::new(),
            memory_settings: serde_json::json!({}),
            permission_policy: crate::config::PermissionPolicy::default(),
            setup_completed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip_agent() {
        let a = Address::agent("nex");
        assert_eq!(parse_address(&a.format()).unwrap(), a);
    }

    #[test]
    fn address_roundtrip_channel() {
        let a = Address::channel("telegram", "42");
        assert_eq!(parse_address(&a.format()).unwrap(), a);
    }

    #[test]
    fn agent_name_validation() {
        assert!(is_valid_agent_name("nex"));
        assert!(is_valid_agent_name("nex-2"));
        assert!(is_valid_agent_name("a-b-c9"));
        assert!(!is_valid_agent_name(""));
        assert!(!is_valid_agent_name("-nex"));
        assert!(!is_valid_agent_name("nex-"));
        assert!(!is_valid_agent_name("nex--2"));
        assert!(!is_valid_agent_name("nex_2"));
    }

    #[test]
    fn permission_ordering() {
        assert!(PermissionLevel::Restricted < PermissionLevel::Standard);
        assert!(PermissionLevel::Standard < PermissionLevel::Privileged);
        assert!(PermissionLevel::Privileged < PermissionLevel::Boss);
    }

    #[test]
    fn metadata_rejects_reserved_keys() {
        let mut m = Metadata::new();
        m.insert(META_SESSION_HANDLE, serde_json::json!("x"));
        assert!(m.reject_reserved().is_err());
    }

    #[test]
    fn envelope_source_classification() {
        let mut base = Envelope {
            id: EnvelopeId::new(),
            from: Address::agent("nex"),
            to: Address::channel("telegram", "1"),
            from_boss: false,
            content: Content::default(),
            reply_to: None,
            deliver_at: None,
            status: EnvelopeStatus::Pending,
            created_at: 0,
            metadata: Metadata::new(),
        };
        assert_eq!(base.source(), EnvelopeSource::Agent);

        base.from = Address::channel("telegram", "1");
        base.to = Address::agent("nex");
        assert_eq!(base.source(), EnvelopeSource::Channel);

        base.from = Address::agent("nex");
        base.metadata.insert(META_CRON_SCHEDULE_ID, serde_json::json!("abc"));
        assert_eq!(base.source(), EnvelopeSource::Cron);
    }
}
