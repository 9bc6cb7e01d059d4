use std::sync::Mutex;

use hiboss_core::types::{
    Agent, AgentRun, Binding, CronSchedule, CronScheduleTemplate, Envelope, EnvelopeId,
    EnvelopeInput, EnvelopeStatus, Metadata, PermissionLevel, ProviderConfig, RunStatus,
    SessionPolicy, StoredConfig, META_LAST_DELIVERY_ERROR,
};
use hiboss_core::{format_address, parse_address};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;
use uuid::Uuid;

use crate::agent::{
    row_to_agent, row_to_binding, serialize_agent_metadata, serialize_provider,
    serialize_session_policy, AGENT_SELECT_SQL,
};
use crate::config::{
    row_to_stored_config, serialize_adapter_boss_ids, serialize_permission_policy,
    CONFIG_SELECT_SQL,
};
use crate::cron::{row_to_cron_schedule, serialize_template, CRON_SELECT_SQL};
use crate::envelope::{
    row_to_envelope, serialize_content, serialize_metadata, EnvelopeLookup, ENVELOPE_SELECT_SQL,
};
use crate::error::{Result, StoreError};
use crate::run::{row_to_agent_run, serialize_processed_ids, RUN_SELECT_SQL};
use crate::schema;

/// Which side of an address the caller wants listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Box_ {
    Inbox,
    Outbox,
}

#[derive(Debug, Default, Clone)]
pub struct ListEnvelopesQuery {
    pub address: String,
    pub box_kind: Option<Box_>,
    pub status: Option<EnvelopeStatus>,
    pub limit: Option<i64>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Durable, single-writer store over a SQLite connection.
///
/// All mutation is serialized through the `Mutex`; reads take the same
/// lock (rusqlite `Connection` isn't `Sync`), but WAL mode means external
/// readers (none in-process here) would not block on writers.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside a single SQL transaction, committing on `Ok`.
    pub fn in_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ---- Envelopes ----------------------------------------------------

    #[instrument(skip(self, input))]
    pub fn create_envelope(&self, input: EnvelopeInput) -> Result<Envelope> {
        let id = EnvelopeId::new();
        let created_at = now_ms();
        let envelope = Envelope {
            id,
            from: input.from,
            to: input.to,
            from_boss: input.from_boss,
            content: input.content,
            reply_to: input.reply_to,
            deliver_at: input.deliver_at,
            status: EnvelopeStatus::Pending,
            created_at,
            metadata: input.metadata,
        };
        self.insert_envelope(&envelope)?;
        Ok(envelope)
    }

    fn insert_envelope(&self, envelope: &Envelope) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO envelopes
             (id, from_addr, to_addr, from_boss, content, reply_to, deliver_at, status, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                envelope.id.to_hex(),
                format_address(&envelope.from),
                format_address(&envelope.to),
                envelope.from_boss as i64,
                serialize_content(&envelope.content)?,
                envelope.reply_to.map(|r| r.to_hex()),
                envelope.deliver_at,
                envelope.status.to_string(),
                envelope.created_at,
                serialize_metadata(&envelope.metadata)?,
            ],
        )?;
        Ok(())
    }

    /// Idempotent terminal transition. Returns the post-update snapshot.
    /// Calling this on an already-`done` envelope is a no-op that still
    /// returns the current row (never re-opens `done -> pending`).
    #[instrument(skip(self))]
    pub fn mark_envelope_done(&self, id: EnvelopeId, error: Option<String>) -> Result<Envelope> {
        let conn = self.conn.lock().unwrap();
        let current = conn.query_row(
            &format!("{ENVELOPE_SELECT_SQL} WHERE id = ?1"),
            params![id.to_hex()],
            row_to_envelope,
        )?;

        if current.status == EnvelopeStatus::Done {
            return Ok(current);
        }

        let mut metadata = current.metadata.clone();
        if let Some(err) = error {
            metadata.insert(META_LAST_DELIVERY_ERROR, serde_json::json!(err));
        }
        let metadata_json = serialize_metadata(&metadata)?;

        conn.execute(
            "UPDATE envelopes SET status = 'done', metadata = ?1 WHERE id = ?2 AND status = 'pending'",
            params![metadata_json, id.to_hex()],
        )?;

        conn.query_row(
            &format!("{ENVELOPE_SELECT_SQL} WHERE id = ?1"),
            params![id.to_hex()],
            row_to_envelope,
        )
        .map_err(StoreError::from)
    }

    /// Accepts a short id, any longer prefix, or the full hex id.
    /// A non-unique prefix surfaces as `Ambiguous`, never guessed.
    #[instrument(skip(self))]
    pub fn get_envelope(&self, id_or_prefix: &str) -> Result<EnvelopeLookup> {
        let cleaned = id_or_prefix.replace('-', "").to_lowercase();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{ENVELOPE_SELECT_SQL} WHERE id LIKE ?1 || '%'"))?;
        let rows: Vec<Envelope> = stmt
            .query_map(params![cleaned], row_to_envelope)?
            .collect::<rusqlite::Result<_>>()?;

        match rows.len() {
            0 => Ok(EnvelopeLookup::NotFound),
            1 => Ok(EnvelopeLookup::Found(rows.into_iter().next().unwrap())),
            _ => {
                if let Some(exact) = rows.iter().find(|e| e.id.to_hex() == cleaned) {
                    Ok(EnvelopeLookup::Found(exact.clone()))
                } else {
                    Ok(EnvelopeLookup::Ambiguous(rows))
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub fn list_envelopes(&self, query: &ListEnvelopesQuery) -> Result<Vec<Envelope>> {
        let column = match query.box_kind {
            Some(Box_::Inbox) | None => "to_addr",
            Some(Box_::Outbox) => "from_addr",
        };
        let mut sql = format!("{ENVELOPE_SELECT_SQL} WHERE {column} = ?1");
        if query.status.is_some() {
            sql.push_str(" AND status = ?2");
        }
        sql.push_str(" ORDER BY COALESCE(deliver_at, created_at) DESC, created_at DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(status) = query.status {
            stmt.query_map(params![query.address, status.to_string()], row_to_envelope)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![query.address], row_to_envelope)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    /// Due pending envelopes addressed to `agent:<name>`, ordered for a turn batch.
    #[instrument(skip(self))]
    pub fn pending_for_agent(&self, name: &str, limit: i64) -> Result<Vec<Envelope>> {
        let to = format_address(&hiboss_core::types::Address::agent(name));
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{ENVELOPE_SELECT_SQL} WHERE to_addr = ?1 AND status = 'pending' \
             AND (deliver_at IS NULL OR deliver_at <= ?2) \
             ORDER BY COALESCE(deliver_at, created_at) ASC, created_at ASC LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![to, now, limit], row_to_envelope)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_due_pending_for_agent(&self, name: &str) -> Result<i64> {
        let to = format_address(&hiboss_core::types::Address::agent(name));
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM envelopes WHERE to_addr = ?1 AND status = 'pending' \
             AND (deliver_at IS NULL OR deliver_at <= ?2)",
            params![to, now],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    #[instrument(skip(self))]
    pub fn list_due_channel_envelopes(&self, limit: i64) -> Result<Vec<Envelope>> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{ENVELOPE_SELECT_SQL} WHERE status = 'pending' AND to_addr LIKE 'channel:%' \
             AND (deliver_at IS NULL OR deliver_at <= ?1) \
             ORDER BY COALESCE(deliver_at, created_at) ASC, created_at ASC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![now, limit], row_to_envelope)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_agents_with_due_envelopes(&self) -> Result<Vec<String>> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT to_addr FROM envelopes WHERE status = 'pending' AND to_addr LIKE 'agent:%' \
             AND (deliver_at IS NULL OR deliver_at <= ?1)",
        )?;
        let rows: Vec<String> = stmt
            .query_map(params![now], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|addr| parse_address(&addr).ok())
            .filter_map(|addr| addr.agent_name().map(str::to_string))
            .collect())
    }

    /// Smallest `deliver_at > now` among pending envelopes — used to arm the
    /// scheduler's next wake-up timer.
    pub fn next_scheduled_envelope(&self) -> Result<Option<Envelope>> {
        let now = now_ms();
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "{ENVELOPE_SELECT_SQL} WHERE status = 'pending' AND deliver_at > ?1 \
                 ORDER BY deliver_at ASC LIMIT 1"
            ),
            params![now],
            row_to_envelope,
        )
        .optional()
        .map_err(StoreError::from)
    }

    // ---- Agents ---------------------------------------------------------

    #[instrument(skip(self, agent))]
    pub fn create_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row("SELECT name FROM agents WHERE name = ?1", params![agent.name], |r| r.get(0))
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::AlreadyExists(format!("agent '{}'", agent.name)));
        }
        conn.execute(
            "INSERT INTO agents (name, token, description, workspace, provider, permission_level, \
             session_policy, metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                agent.name,
                agent.token,
                agent.description,
                agent.workspace,
                serialize_provider(&agent.provider)?,
                agent.permission_level.to_string(),
                serialize_session_policy(&agent.session_policy)?,
                serialize_agent_metadata(&agent.metadata)?,
                agent.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, name: &str) -> Result<Agent> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{AGENT_SELECT_SQL} WHERE name = ?1"), params![name], row_to_agent)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("agent '{name}'")))
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{AGENT_SELECT_SQL} ORDER BY name ASC"))?;
        let rows = stmt.query_map([], row_to_agent)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Removes the agent row; bindings and cron schedules are removed by the
    /// caller's transaction (see `hiboss-router`'s delete flow). Historical
    /// envelopes and runs are preserved per spec.
    pub fn delete_agent(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM agents WHERE name = ?1", params![name])?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{name}'")));
        }
        Ok(())
    }

    pub fn delete_bindings_for_agent(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM bindings WHERE agent_name = ?1", params![name])?;
        Ok(())
    }

    pub fn set_agent_metadata(&self, name: &str, metadata: &Metadata) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE agents SET metadata = ?1 WHERE name = ?2",
            params![serialize_agent_metadata(metadata)?, name],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{name}'")));
        }
        Ok(())
    }

    pub fn set_agent_session_policy(&self, name: &str, policy: &SessionPolicy) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE agents SET session_policy = ?1 WHERE name = ?2",
            params![serialize_session_policy(policy)?, name],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{name}'")));
        }
        Ok(())
    }

    pub fn set_agent_provider(&self, name: &str, provider: &ProviderConfig) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE agents SET provider = ?1 WHERE name = ?2",
            params![serialize_provider(provider)?, name],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{name}'")));
        }
        Ok(())
    }

    pub fn set_agent_permission_level(&self, name: &str, level: PermissionLevel) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE agents SET permission_level = ?1 WHERE name = ?2",
            params![level.to_string(), name],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{name}'")));
        }
        Ok(())
    }

    pub fn verify_boss(&self, token_hash: &str) -> Result<bool> {
        let config = self.get_config()?;
        Ok(config.boss_token_hash.as_deref() == Some(token_hash))
    }

    pub fn find_agent_by_token(&self, token: &str) -> Result<Option<Agent>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{AGENT_SELECT_SQL} WHERE token = ?1"), params![token], row_to_agent)
            .optional()
            .map_err(StoreError::from)
    }

    // ---- Bindings ---------------------------------------------------------

    pub fn create_binding(&self, binding: &Binding) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT agent_name FROM bindings WHERE adapter_type = ?1 AND adapter_token = ?2",
                params![binding.adapter_type, binding.adapter_token],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "binding for adapter '{}'",
                binding.adapter_type
            )));
        }
        conn.execute(
            "INSERT INTO bindings (agent_name, adapter_type, adapter_token, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                binding.agent_name,
                binding.adapter_type,
                binding.adapter_token,
                binding.created_at
            ],
        )?;
        Ok(())
    }

    pub fn delete_binding(&self, adapter_type: &str, adapter_token: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM bindings WHERE adapter_type = ?1 AND adapter_token = ?2",
            params![adapter_type, adapter_token],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("binding for adapter '{adapter_type}'")));
        }
        Ok(())
    }

    pub fn list_bindings_for_agent(&self, agent_name: &str) -> Result<Vec<Binding>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT agent_name, adapter_type, adapter_token, created_at FROM bindings \
             WHERE agent_name = ?1",
        )?;
        let rows = stmt
            .query_map(params![agent_name], row_to_binding)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The binding, if any, letting `agent_name` speak on `adapter_type`.
    pub fn find_binding_for_adapter(&self, agent_name: &str, adapter_type: &str) -> Result<Option<Binding>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT agent_name, adapter_type, adapter_token, created_at FROM bindings \
             WHERE agent_name = ?1 AND adapter_type = ?2",
            params![agent_name, adapter_type],
            row_to_binding,
        )
        .optional()
        .map_err(StoreError::from)
    }

    // ---- Cron schedules ---------------------------------------------------

    pub fn create_cron_schedule(&self, schedule: &CronSchedule) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cron_schedules (id, owner_agent, cron, timezone, enabled, \
             pending_envelope_id, template, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                schedule.id.to_string(),
                schedule.owner_agent,
                schedule.cron,
                schedule.timezone,
                schedule.enabled as i64,
                schedule.pending_envelope_id.map(|id| id.to_hex()),
                serialize_template(&schedule.template)?,
                schedule.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_cron_schedule(&self, id: Uuid) -> Result<CronSchedule> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{CRON_SELECT_SQL} WHERE id = ?1"),
            params![id.to_string()],
            row_to_cron_schedule,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("cron schedule '{id}'")))
    }

    pub fn list_cron_schedules(&self) -> Result<Vec<CronSchedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{CRON_SELECT_SQL} ORDER BY created_at ASC"))?;
        let rows = stmt
            .query_map([], row_to_cron_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_enabled_cron_schedules(&self) -> Result<Vec<CronSchedule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{CRON_SELECT_SQL} WHERE enabled = 1 ORDER BY created_at ASC"))?;
        let rows = stmt
            .query_map([], row_to_cron_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_cron_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE cron_schedules SET enabled = ?1 WHERE id = ?2",
            params![enabled as i64, id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("cron schedule '{id}'")));
        }
        Ok(())
    }

    pub fn set_pending_envelope_id(&self, id: Uuid, envelope_id: Option<EnvelopeId>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE cron_schedules SET pending_envelope_id = ?1 WHERE id = ?2",
            params![envelope_id.map(|e| e.to_hex()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("cron schedule '{id}'")));
        }
        Ok(())
    }

    /// Atomically mark `finished_envelope_id` `done` and materialize
    /// `next_envelope` (if any) as the schedule's new pending envelope,
    /// clearing `pending_envelope_id` when there is none. Used by the cron
    /// materializer so "mark done" and "advance" never observe a window
    /// with zero or two pending envelopes for the same schedule.
    #[instrument(skip(self, next_envelope))]
    pub fn advance_cron_schedule(
        &self,
        cron_id: Uuid,
        finished_envelope_id: EnvelopeId,
        delivery_note: Option<&str>,
        next_envelope: Option<Envelope>,
    ) -> Result<Option<Envelope>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current = tx.query_row(
            &format!("{ENVELOPE_SELECT_SQL} WHERE id = ?1"),
            params![finished_envelope_id.to_hex()],
            row_to_envelope,
        )?;
        if current.status != EnvelopeStatus::Done {
            let mut metadata = current.metadata.clone();
            if let Some(note) = delivery_note {
                metadata.insert(META_LAST_DELIVERY_ERROR, serde_json::json!(note));
            }
            tx.execute(
                "UPDATE envelopes SET status = 'done', metadata = ?1 WHERE id = ?2",
                params![serialize_metadata(&metadata)?, finished_envelope_id.to_hex()],
            )?;
        }

        if let Some(envelope) = &next_envelope {
            tx.execute(
                "INSERT INTO envelopes
                 (id, from_addr, to_addr, from_boss, content, reply_to, deliver_at, status, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    envelope.id.to_hex(),
                    format_address(&envelope.from),
                    format_address(&envelope.to),
                    envelope.from_boss as i64,
                    serialize_content(&envelope.content)?,
                    envelope.reply_to.map(|r| r.to_hex()),
                    envelope.deliver_at,
                    envelope.status.to_string(),
                    envelope.created_at,
                    serialize_metadata(&envelope.metadata)?,
                ],
            )?;
        }

        tx.execute(
            "UPDATE cron_schedules SET pending_envelope_id = ?1 WHERE id = ?2",
            params![next_envelope.as_ref().map(|e| e.id.to_hex()), cron_id.to_string()],
        )?;

        tx.commit()?;
        Ok(next_envelope)
    }

    pub fn delete_cron_schedule(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM cron_schedules WHERE id = ?1", params![id.to_string()])?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("cron schedule '{id}'")));
        }
        Ok(())
    }

    // ---- Agent runs ---------------------------------------------------------

    #[instrument(skip(self))]
    pub fn start_run(&self, agent_name: &str) -> Result<AgentRun> {
        let id = Uuid::new_v4();
        let started_at = now_ms();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO agent_runs (id, agent_name, started_at, processed_envelope_ids, status) \
             VALUES (?1, ?2, ?3, '[]', 'running')",
            params![id.to_string(), agent_name, started_at],
        )?;
        Ok(AgentRun {
            id,
            agent_name: agent_name.to_string(),
            started_at,
            completed_at: None,
            processed_envelope_ids: Vec::new(),
            final_response: None,
            status: RunStatus::Running,
            error_message: None,
            context_length: None,
        })
    }

    fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        processed: &[EnvelopeId],
        final_response: Option<&str>,
        error_message: Option<&str>,
        context_length: Option<u64>,
    ) -> Result<AgentRun> {
        let completed_at = now_ms();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE agent_runs SET status = ?1, completed_at = ?2, processed_envelope_ids = ?3, \
             final_response = ?4, error_message = ?5, context_length = ?6 WHERE id = ?7",
            params![
                status.to_string(),
                completed_at,
                serialize_processed_ids(processed)?,
                final_response,
                error_message,
                context_length,
                id.to_string(),
            ],
        )?;
        conn.query_row(&format!("{RUN_SELECT_SQL} WHERE id = ?1"), params![id.to_string()], row_to_agent_run)
            .map_err(StoreError::from)
    }

    pub fn complete_run(
        &self,
        id: Uuid,
        processed: &[EnvelopeId],
        final_response: Option<&str>,
        context_length: Option<u64>,
    ) -> Result<AgentRun> {
        self.finish_run(id, RunStatus::Completed, processed, final_response, None, context_length)
    }

    pub fn fail_run(&self, id: Uuid, processed: &[EnvelopeId], error_message: &str) -> Result<AgentRun> {
        self.finish_run(id, RunStatus::Failed, processed, None, Some(error_message), None)
    }

    pub fn cancel_run(&self, id: Uuid, processed: &[EnvelopeId], reason: &str) -> Result<AgentRun> {
        self.finish_run(id, RunStatus::Cancelled, processed, None, Some(reason), None)
    }

    pub fn get_current_running(&self, agent_name: &str) -> Result<Option<AgentRun>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{RUN_SELECT_SQL} WHERE agent_name = ?1 AND status = 'running' ORDER BY started_at DESC LIMIT 1"),
            params![agent_name],
            row_to_agent_run,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_last_finished(&self, agent_name: &str) -> Result<Option<AgentRun>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "{RUN_SELECT_SQL} WHERE agent_name = ?1 AND status != 'running' \
                 ORDER BY completed_at DESC LIMIT 1"
            ),
            params![agent_name],
            row_to_agent_run,
        )
        .optional()
        .map_err(StoreError::from)
    }

    // ---- Config ---------------------------------------------------------

    pub fn get_config(&self) -> Result<StoredConfig> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(CONFIG_SELECT_SQL, [], row_to_stored_config)
            .map_err(StoreError::from)
    }

    pub fn set_boss_name(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE config SET boss_name = ?1 WHERE id = 1", params![name])?;
        Ok(())
    }

    pub fn set_boss_timezone(&self, timezone: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE config SET boss_timezone = ?1 WHERE id = 1", params![timezone])?;
        Ok(())
    }

    pub fn set_boss_token_hash(&self, hash: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE config SET boss_token_hash = ?1 WHERE id = 1", params![hash])?;
        Ok(())
    }

    pub fn set_adapter_boss_id(&self, adapter_type: &str, boss_id: &str) -> Result<()> {
        let mut config = self.get_config()?;
        config
            .adapter_boss_ids
            .insert(adapter_type.to_string(), boss_id.to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE config SET adapter_boss_ids = ?1 WHERE id = 1",
            params![serialize_adapter_boss_ids(&config.adapter_boss_ids)?],
        )?;
        Ok(())
    }

    pub fn set_permission_policy(&self, policy: &hiboss_core::config::PermissionPolicy) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE config SET permission_policy = ?1 WHERE id = 1",
            params![serialize_permission_policy(policy)?],
        )?;
        Ok(())
    }

    pub fn set_setup_completed(&self, completed: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE config SET setup_completed = ?1 WHERE id = 1",
            params![completed as i64],
        )?;
        Ok(())
    }
}
