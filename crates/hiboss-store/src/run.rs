use hiboss_core::types::{AgentRun, EnvelopeId, RunStatus};
use rusqlite::Row;
use uuid::Uuid;

use crate::error::Result;

pub(crate) const RUN_SELECT_SQL: &str = "SELECT id, agent_name, started_at, completed_at, \
     processed_envelope_ids, final_response, status, error_message, context_length FROM agent_runs";

pub(crate) fn row_to_agent_run(row: &Row<'_>) -> rusqlite::Result<AgentRun> {
    let id_str: String = row.get(0)?;
    let processed_json: String = row.get(4)?;
    let status_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let processed_hex: Vec<String> = serde_json::from_str(&processed_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
    let processed_envelope_ids = processed_hex
        .into_iter()
        .map(|s| EnvelopeId::parse(&s))
        .collect::<hiboss_core::Result<Vec<_>>>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
    let status: RunStatus = status_str
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into()))?;

    Ok(AgentRun {
        id,
        agent_name: row.get(1)?,
        started_at: row.get(2)?,
        completed_at: row.get(3)?,
        processed_envelope_ids,
        final_response: row.get(5)?,
        status,
        error_message: row.get(7)?,
        context_length: row.get(8)?,
    })
}

pub(crate) fn serialize_processed_ids(ids: &[EnvelopeId]) -> Result<String> {
    let hex: Vec<String> = ids.iter().map(|id| id.to_hex()).collect();
    Ok(serde_json::to_string(&hex)?)
}
