//! Resolves the caller of an inbound request from its bearer token, before
//! dispatch checks the method's required permission level against it.

use hiboss_core::{hash_token, HiBossError};
use hiboss_store::Store;

use crate::error::IpcError;

#[derive(Debug, Clone)]
pub enum Principal {
    Boss,
    Agent(String),
}

impl Principal {
    pub fn level(&self, store: &Store) -> hiboss_store::Result<hiboss_core::types::PermissionLevel> {
        match self {
            Principal::Boss => Ok(hiboss_core::types::PermissionLevel::Boss),
            Principal::Agent(name) => Ok(store.get_agent(name)?.permission_level),
        }
    }

    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Principal::Boss => None,
            Principal::Agent(name) => Some(name),
        }
    }
}

/// Boss tokens are compared by hash; agent tokens are looked up verbatim,
/// matching `Store::find_agent_by_token`'s stored representation.
pub fn resolve(store: &Store, token: &str) -> Result<Principal, IpcError> {
    if token.is_empty() {
        return Err(IpcError::Core(HiBossError::Unauthorized("missing token".into())));
    }
    if store.verify_boss(&hash_token(token))? {
        return Ok(Principal::Boss);
    }
    if let Some(agent) = store.find_agent_by_token(token)? {
        return Ok(Principal::Agent(agent.name));
    }
    Err(IpcError::Core(HiBossError::Unauthorized("unrecognized token".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiboss_core::types::{Agent, PermissionLevel, ProviderConfig, SessionPolicy};

    fn sample_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.set_boss_token_hash(&hash_token("boss-secret")).unwrap();
        store
            .create_agent(&Agent {
                name: "nex".into(),
                token: "agent-secret".into(),
                description: None,
                workspace: None,
                provider: ProviderConfig::default(),
                permission_level: PermissionLevel::Standard,
                session_policy: SessionPolicy::default(),
                metadata: Default::default(),
                created_at: 0,
            })
            .unwrap();
        store
    }

    #[test]
    fn boss_token_resolves_to_boss() {
        let store = sample_store();
        assert!(matches!(resolve(&store, "boss-secret"), Ok(Principal::Boss)));
    }

    #[test]
    fn agent_token_resolves_to_agent() {
        let store = sample_store();
        match resolve(&store, "agent-secret") {
            Ok(Principal::Agent(name)) => assert_eq!(name, "nex"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_token_is_unauthorized() {
        let store = sample_store();
        assert!(matches!(resolve(&store, "garbage"), Err(IpcError::Core(HiBossError::Unauthorized(_)))));
    }

    #[test]
    fn empty_token_is_unauthorized() {
        let store = sample_store();
        assert!(matches!(resolve(&store, ""), Err(IpcError::Core(HiBossError::Unauthorized(_)))));
    }
}
