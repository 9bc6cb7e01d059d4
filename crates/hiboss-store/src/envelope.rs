use hiboss_core::types::{Content, Envelope, EnvelopeId, EnvelopeStatus, Metadata};
use hiboss_core::{parse_address, HiBossError};
use rusqlite::Row;

use crate::error::Result;

/// Result of a by-id-or-prefix envelope lookup. Ambiguity is a domain
/// return, not an error — callers decide how to report it.
#[derive(Debug)]
pub enum EnvelopeLookup {
    Found(Envelope),
    Ambiguous(Vec<Envelope>),
    NotFound,
}

pub(crate) const ENVELOPE_SELECT_SQL: &str = "SELECT id, from_addr, to_addr, from_boss, content, \
     reply_to, deliver_at, status, created_at, metadata FROM envelopes";

pub(crate) fn row_to_envelope(row: &Row<'_>) -> rusqlite::Result<Envelope> {
    let id_hex: String = row.get(0)?;
    let from_str: String = row.get(1)?;
    let to_str: String = row.get(2)?;
    let content_json: String = row.get(4)?;
    let reply_to: Option<String> = row.get(5)?;
    let status_str: String = row.get(7)?;
    let metadata_json: String = row.get(9)?;

    let to_sql_err = |e: HiBossError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    let id = EnvelopeId::parse(&id_hex).map_err(to_sql_err)?;
    let from = parse_address(&from_str).map_err(to_sql_err)?;
    let to = parse_address(&to_str).map_err(to_sql_err)?;
    let content: Content = serde_json::from_str(&content_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
    let reply_to = reply_to
        .map(|s| EnvelopeId::parse(&s))
        .transpose()
        .map_err(to_sql_err)?;
    let status: EnvelopeStatus = status_str
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into()))?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Envelope {
        id,
        from,
        to,
        from_boss: row.get::<_, i64>(3)? != 0,
        content,
        reply_to,
        deliver_at: row.get(6)?,
        status,
        created_at: row.get(8)?,
        metadata,
    })
}

pub(crate) fn serialize_content(content: &Content) -> Result<String> {
    Ok(serde_json::to_string(content)?)
}

pub(crate) fn serialize_metadata(metadata: &Metadata) -> Result<String> {
    Ok(serde_json::to_string(metadata)?)
}
