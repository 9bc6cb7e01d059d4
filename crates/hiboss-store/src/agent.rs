use hiboss_core::types::{Agent, Binding, Metadata, PermissionLevel, ProviderConfig, SessionPolicy};
use rusqlite::Row;

use crate::error::Result;

pub(crate) const AGENT_SELECT_SQL: &str = "SELECT name, token, description, workspace, provider, \
     permission_level, session_policy, metadata, created_at FROM agents";

pub(crate) fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let provider_json: String = row.get(4)?;
    let level_str: String = row.get(5)?;
    let policy_json: String = row.get(6)?;
    let metadata_json: String = row.get(7)?;

    let provider: ProviderConfig = serde_json::from_str(&provider_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
    let permission_level: PermissionLevel = level_str
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into()))?;
    let session_policy: SessionPolicy = serde_json::from_str(&policy_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Agent {
        name: row.get(0)?,
        token: row.get(1)?,
        description: row.get(2)?,
        workspace: row.get(3)?,
        provider,
        permission_level,
        session_policy,
        metadata,
        created_at: row.get(8)?,
    })
}

pub(crate) fn row_to_binding(row: &Row<'_>) -> rusqlite::Result<Binding> {
    Ok(Binding {
        agent_name: row.get(0)?,
        adapter_type: row.get(1)?,
        adapter_token: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub(crate) fn serialize_provider(provider: &ProviderConfig) -> Result<String> {
    Ok(serde_json::to_string(provider)?)
}

pub(crate) fn serialize_session_policy(policy: &SessionPolicy) -> Result<String> {
    Ok(serde_json::to_string(policy)?)
}

pub(crate) fn serialize_agent_metadata(metadata: &Metadata) -> Result<String> {
    Ok(serde_json::to_string(metadata)?)
}
