//! Startup-time fatal checks that can't be expressed as a Store constraint
//! because they're about the whole agent population, not one row.

use hiboss_store::Store;

/// At least one agent must be a speaker (≥1 channel binding) and at least
/// one must be a leader (0 bindings), or there's nobody to receive incoming
/// channel traffic and nobody to hold an unbound, boss-only conversation.
pub fn validate_speaker_leader(store: &Store) -> anyhow::Result<()> {
    let agents = store.list_agents()?;
    if agents.is_empty() {
        anyhow::bail!("no agents registered; register at least one speaker and one leader before starting the daemon");
    }

    let mut has_speaker = false;
    let mut has_leader = false;
    for agent in &agents {
        let bindings = store.list_bindings_for_agent(&agent.name)?;
        if bindings.is_empty() {
            has_leader = true;
        } else {
            has_speaker = true;
        }
        if has_speaker && has_leader {
            return Ok(());
        }
    }

    anyhow::bail!(
        "speaker/leader invariant violated: need >=1 agent with a channel binding (speaker) and >=1 without (leader); \
         found speaker={has_speaker} leader={has_leader}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiboss_core::types::{Agent, Binding, PermissionLevel, ProviderConfig, SessionPolicy};

    fn agent(name: &str) -> Agent {
        Agent {
            name: name.to_string(),
            token: format!("{name}-token"),
            description: None,
            workspace: None,
            provider: ProviderConfig::default(),
            permission_level: PermissionLevel::Standard,
            session_policy: SessionPolicy::default(),
            metadata: Default::default(),
            created_at: 0,
        }
    }

    #[test]
    fn fails_with_no_agents() {
        let store = Store::open_in_memory().unwrap();
        assert!(validate_speaker_leader(&store).is_err());
    }

    #[test]
    fn fails_with_only_leaders() {
        let store = Store::open_in_memory().unwrap();
        store.create_agent(&agent("nex")).unwrap();
        assert!(validate_speaker_leader(&store).is_err());
    }

    #[test]
    fn fails_with_only_speakers() {
        let store = Store::open_in_memory().unwrap();
        store.create_agent(&agent("nex")).unwrap();
        store
            .create_binding(&Binding {
                agent_name: "nex".into(),
                adapter_type: "telegram".into(),
                adapter_token: "chat:1".into(),
                created_at: 0,
            })
            .unwrap();
        assert!(validate_speaker_leader(&store).is_err());
    }

    #[test]
    fn passes_with_one_of_each() {
        let store = Store::open_in_memory().unwrap();
        store.create_agent(&agent("nex")).unwrap();
        store.create_agent(&agent("ada")).unwrap();
        store
            .create_binding(&Binding {
                agent_name: "nex".into(),
                adapter_type: "telegram".into(),
                adapter_token: "chat:1".into(),
                created_at: 0,
            })
            .unwrap();
        assert!(validate_speaker_leader(&store).is_ok());
    }
}
