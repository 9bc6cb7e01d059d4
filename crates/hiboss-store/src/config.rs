use hiboss_core::config::PermissionPolicy;
use hiboss_core::types::StoredConfig;
use rusqlite::Row;

use crate::error::Result;

pub(crate) const CONFIG_SELECT_SQL: &str = "SELECT boss_name, boss_timezone, boss_token_hash, \
     adapter_boss_ids, memory_settings, permission_policy, setup_completed FROM config WHERE id = 1";

pub(crate) fn row_to_stored_config(row: &Row<'_>) -> rusqlite::Result<StoredConfig> {
    let adapter_ids_json: String = row.get(3)?;
    let memory_json: String = row.get(4)?;
    let policy_json: String = row.get(5)?;

    let adapter_boss_ids = serde_json::from_str(&adapter_ids_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    let memory_settings = serde_json::from_str(&memory_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
    let permission_policy: PermissionPolicy = serde_json::from_str(&policy_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(StoredConfig {
        boss_name: row.get(0)?,
        boss_timezone: row.get(1)?,
        boss_token_hash: row.get(2)?,
        adapter_boss_ids,
        memory_settings,
        permission_policy,
        setup_completed: row.get::<_, i64>(6)? != 0,
    })
}

pub(crate) fn serialize_adapter_boss_ids(
    ids: &std::collections::BTreeMap<String, String>,
) -> Result<String> {
    Ok(serde_json::to_string(ids)?)
}

pub(crate) fn serialize_permission_policy(policy: &PermissionPolicy) -> Result<String> {
    Ok(serde_json::to_string(policy)?)
}
