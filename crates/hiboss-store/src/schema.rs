use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Bumped whenever a migration changes table shape in a way old binaries
/// can't read. No down-migrations: this is a single-binary daemon.
pub const SCHEMA_VERSION: i64 = 1;

/// Initialise (or verify) the full schema in `conn`. Safe to call on every
/// startup — every `CREATE` is `IF NOT EXISTS`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    create_envelopes_table(conn)?;
    create_agents_table(conn)?;
    create_bindings_table(conn)?;
    create_cron_schedules_table(conn)?;
    create_agent_runs_table(conn)?;
    create_config_table(conn)?;
    check_schema_version(conn)?;
    Ok(())
}

fn check_schema_version(conn: &Connection) -> Result<()> {
    let stored: Option<i64> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .ok()
        .and_then(|s| s.parse().ok());

    match stored {
        None => {
            conn.execute(
                "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('version', ?1)",
                rusqlite::params![SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        }
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(v) => Err(StoreError::SchemaVersion {
            found: v,
            expected: SCHEMA_VERSION,
        }),
    }
}

fn create_envelopes_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            key     TEXT PRIMARY KEY,
            value   TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS envelopes (
            id          TEXT    NOT NULL PRIMARY KEY,
            from_addr   TEXT    NOT NULL,
            to_addr     TEXT    NOT NULL,
            from_boss   INTEGER NOT NULL DEFAULT 0,
            content     TEXT    NOT NULL,
            reply_to    TEXT,
            deliver_at  INTEGER,
            status      TEXT    NOT NULL DEFAULT 'pending',
            created_at  INTEGER NOT NULL,
            metadata    TEXT    NOT NULL DEFAULT '{}'
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_envelopes_to_status_deliver
            ON envelopes (to_addr, status, deliver_at);
        CREATE INDEX IF NOT EXISTS idx_envelopes_from
            ON envelopes (from_addr);
        CREATE INDEX IF NOT EXISTS idx_envelopes_status_deliver
            ON envelopes (status, deliver_at);",
    )?;
    Ok(())
}

fn create_agents_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agents (
            name             TEXT    NOT NULL PRIMARY KEY COLLATE NOCASE,
            token            TEXT    NOT NULL UNIQUE,
            description      TEXT,
            workspace        TEXT,
            provider         TEXT    NOT NULL DEFAULT '{}',
            permission_level TEXT    NOT NULL DEFAULT 'standard',
            session_policy   TEXT    NOT NULL DEFAULT '{}',
            metadata         TEXT    NOT NULL DEFAULT '{}',
            created_at       INTEGER NOT NULL
        ) STRICT;",
    )?;
    Ok(())
}

fn create_bindings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bindings (
            agent_name    TEXT    NOT NULL REFERENCES agents(name),
            adapter_type  TEXT    NOT NULL,
            adapter_token TEXT    NOT NULL,
            created_at    INTEGER NOT NULL,
            PRIMARY KEY (adapter_type, adapter_token)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_bindings_agent ON bindings (agent_name);",
    )?;
    Ok(())
}

fn create_cron_schedules_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cron_schedules (
            id                    TEXT    NOT NULL PRIMARY KEY,
            owner_agent           TEXT    NOT NULL REFERENCES agents(name),
            cron                  TEXT    NOT NULL,
            timezone              TEXT,
            enabled               INTEGER NOT NULL DEFAULT 1,
            pending_envelope_id   TEXT,
            template              TEXT    NOT NULL,
            created_at            INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_cron_owner ON cron_schedules (owner_agent);
        CREATE INDEX IF NOT EXISTS idx_cron_enabled ON cron_schedules (enabled);",
    )?;
    Ok(())
}

fn create_agent_runs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_runs (
            id                      TEXT    NOT NULL PRIMARY KEY,
            agent_name              TEXT    NOT NULL REFERENCES agents(name),
            started_at              INTEGER NOT NULL,
            completed_at            INTEGER,
            processed_envelope_ids  TEXT    NOT NULL DEFAULT '[]',
            final_response          TEXT,
            status                  TEXT    NOT NULL DEFAULT 'running',
            error_message           TEXT,
            context_length          INTEGER
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_runs_agent_started
            ON agent_runs (agent_name, started_at DESC);
        CREATE INDEX IF NOT EXISTS idx_runs_agent_status
            ON agent_runs (agent_name, status);",
    )?;
    Ok(())
}

fn create_config_table(conn: &Connection) -> Result<()> {
    // Single-row table: the Config entity has a fixed, typed field set
    // rather than arbitrary keys, so a STRICT row beats a loose key/value
    // table for the same reason `agents`/`envelopes` are typed.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS config (
            id                 INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
            boss_name          TEXT,
            boss_timezone      TEXT    NOT NULL DEFAULT 'UTC',
            boss_token_hash    TEXT,
            adapter_boss_ids   TEXT    NOT NULL DEFAULT '{}',
            memory_settings    TEXT    NOT NULL DEFAULT '{}',
            permission_policy  TEXT    NOT NULL DEFAULT '{\"version\":1,\"operations\":{}}',
            setup_completed    INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        INSERT OR IGNORE INTO config (id) VALUES (1);",
    )?;
    Ok(())
}
