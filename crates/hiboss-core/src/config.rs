use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Permission policy schema version — see `PermissionPolicy`.
pub const PERMISSION_POLICY_VERSION: u32 = 1;

/// Default IANA timezone used when no boss timezone is configured yet.
pub const DEFAULT_TIMEZONE: &str = "UTC";

fn default_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.hiboss")
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_db_filename() -> String {
    "hiboss.db".to_string()
}

fn default_socket_filename() -> String {
    "daemon.sock".to_string()
}

fn default_lock_heartbeat_secs() -> u64 {
    15
}

/// Top-level config (`hiboss.toml` + `HIBOSS_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiBossConfig {
    /// Root data directory. Holds `.daemon/`, `agents/`, `media/`, `BOSS.md`.
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub boss: BossConfig,
}

impl Default for HiBossConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            daemon: DaemonConfig::default(),
            boss: BossConfig::default(),
        }
    }
}

/// IPC/daemon-process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_db_filename")]
    pub db_filename: String,
    #[serde(default = "default_socket_filename")]
    pub socket_filename: String,
    /// Seconds between advisory-lock pid-file heartbeat refreshes; a lock
    /// older than 3x this value is considered stale and may be taken over.
    #[serde(default = "default_lock_heartbeat_secs")]
    pub lock_heartbeat_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_filename: default_db_filename(),
            socket_filename: default_socket_filename(),
            lock_heartbeat_secs: default_lock_heartbeat_secs(),
        }
    }
}

/// Seed values for the Store's `Config` entity (spec §3); authoritative
/// values live in the store once `setup_completed` is true, this only
/// supplies first-run defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BossConfig {
    pub name: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for BossConfig {
    fn default() -> Self {
        Self {
            name: None,
            timezone: default_timezone(),
        }
    }
}

impl HiBossConfig {
    /// Load config from a TOML file with `HIBOSS_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `~/.hiboss/hiboss.toml`
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: HiBossConfig = Figment::from(figment::providers::Serialized::defaults(
            HiBossConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("HIBOSS_").split("_"))
        .extract()
        .map_err(|e| crate::error::HiBossError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn daemon_dir(&self) -> String {
        format!("{}/.daemon", self.root)
    }

    pub fn db_path(&self) -> String {
        format!("{}/{}", self.daemon_dir(), self.daemon.db_filename)
    }

    pub fn socket_path(&self) -> String {
        format!("{}/{}", self.daemon_dir(), self.daemon.socket_filename)
    }

    pub fn lock_path(&self) -> String {
        format!("{}/daemon.lock", self.daemon_dir())
    }

    pub fn pid_path(&self) -> String {
        format!("{}/daemon.pid", self.daemon_dir())
    }

    pub fn log_path(&self) -> String {
        format!("{}/daemon.log", self.daemon_dir())
    }

    pub fn agents_dir(&self) -> String {
        format!("{}/agents", self.root)
    }

    pub fn agent_home(&self, name: &str) -> String {
        format!("{}/{}", self.agents_dir(), name)
    }

    pub fn media_dir(&self) -> String {
        format!("{}/media", self.root)
    }

    pub fn boss_profile_path(&self) -> String {
        format!("{}/BOSS.md", self.root)
    }
}

fn default_config_path() -> String {
    format!("{}/hiboss.toml", default_root())
}

/// Permission policy file (spec §6): `{ version: 1, operations: { method: level } }`.
/// Unspecified methods default to `boss`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub version: u32,
    #[serde(default)]
    pub operations: std::collections::BTreeMap<String, crate::types::PermissionLevel>,
}

impl PermissionPolicy {
    /// Required level for `method`, defaulting to `boss` when unspecified.
    pub fn required_level(&self, method: &str) -> crate::types::PermissionLevel {
        self.operations
            .get(method)
            .copied()
            .unwrap_or(crate::types::PermissionLevel::Boss)
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            version: PERMISSION_POLICY_VERSION,
            operations: std::collections::BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PermissionLevel;

    #[test]
    fn unspecified_method_defaults_to_boss() {
        let policy = PermissionPolicy::default();
        assert_eq!(policy.required_level("agent.delete"), PermissionLevel::Boss);
    }

    #[test]
    fn data_dir_layout_paths() {
        let cfg = HiBossConfig {
            root: "/tmp/hb-test".to_string(),
            ..HiBossConfig::default()
        };
        assert_eq!(cfg.daemon_dir(), "/tmp/hb-test/.daemon");
        assert_eq!(cfg.db_path(), "/tmp/hb-test/.daemon/hiboss.db");
        assert_eq!(cfg.socket_path(), "/tmp/hb-test/.daemon/daemon.sock");
        assert_eq!(cfg.agent_home("nex"), "/tmp/hb-test/agents/nex");
    }
}
