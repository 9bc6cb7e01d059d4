use hiboss_core::types::{CronSchedule, CronScheduleTemplate, EnvelopeId};
use rusqlite::Row;
use uuid::Uuid;

use crate::error::Result;

pub(crate) const CRON_SELECT_SQL: &str = "SELECT id, owner_agent, cron, timezone, enabled, \
     pending_envelope_id, template, created_at FROM cron_schedules";

pub(crate) fn row_to_cron_schedule(row: &Row<'_>) -> rusqlite::Result<CronSchedule> {
    let id_str: String = row.get(0)?;
    let pending: Option<String> = row.get(5)?;
    let template_json: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let pending_envelope_id = pending
        .map(|s| EnvelopeId::parse(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;
    let template: CronScheduleTemplate = serde_json::from_str(&template_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(CronSchedule {
        id,
        owner_agent: row.get(1)?,
        cron: row.get(2)?,
        timezone: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        pending_envelope_id,
        template,
        created_at: row.get(7)?,
    })
}

pub(crate) fn serialize_template(template: &CronScheduleTemplate) -> Result<String> {
    Ok(serde_json::to_string(template)?)
}
