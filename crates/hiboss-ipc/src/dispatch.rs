//! Routes a resolved request to its handler. Method groups get their own
//! match arm; each returns the JSON value that becomes the frame's `result`.

use std::sync::Arc;

use chrono::Utc;
use hiboss_core::types::{
    Address, Agent, Binding, Content, CronSchedule, CronScheduleTemplate, Envelope, EnvelopeInput,
    Metadata, PermissionLevel, ProviderConfig, SessionPolicy,
};
use hiboss_core::HiBossError;
use hiboss_executor::{Executor, REFRESH_REASON_MANUAL_NEW};
use hiboss_router::Router;
use hiboss_store::{Box_, EnvelopeLookup, ListEnvelopesQuery, Store};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::IpcError;
use crate::principal::Principal;

/// The subsystem handles a request needs; constructed once at daemon startup.
pub struct Context {
    pub store: Arc<Store>,
    pub router: Arc<Router>,
    pub executor: Arc<Executor>,
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, IpcError> {
    serde_json::from_value(params)
        .map_err(|e| IpcError::Core(HiBossError::InvalidInput(format!("invalid params: {e}"))))
}

fn require_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, IpcError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| IpcError::Core(HiBossError::InvalidInput(format!("missing field '{field}'"))))
}

/// Turn an `envelope.get`/cron-lookup prefix clash into the candidate list
/// the IPC error surface requires, instead of the thin `{prefix, count}`
/// shared taxonomy carries.
fn envelope_to_candidate(e: &Envelope) -> Value {
    json!({
        "id": e.id.short(),
        "excerpt": e.content.text.as_deref().unwrap_or("").chars().take(80).collect::<String>(),
    })
}

pub async fn dispatch(ctx: &Context, principal: &Principal, method: &str, params: Value) -> Result<Value, IpcError> {
    match method {
        "daemon.ping" => Ok(json!({ "pong": true })),
        "daemon.time" => Ok(json!({ "now_ms": Utc::now().timestamp_millis() })),
        "daemon.status" => daemon_status(ctx).await,

        "envelope.send" => envelope_send(ctx, principal, params).await,
        "envelope.list" => envelope_list(ctx, params),
        "envelope.get" => envelope_get(ctx, params),

        "cron.create" => cron_create(ctx, principal, params),
        "cron.list" => cron_list(ctx),
        "cron.enable" => cron_set_enabled(ctx, params, true),
        "cron.disable" => cron_set_enabled(ctx, params, false),
        "cron.delete" => cron_delete(ctx, params),
        "cron.explain" => cron_explain(ctx, params),

        "agent.register" => agent_register(ctx, params),
        "agent.set" => agent_set(ctx, params),
        "agent.list" => agent_list(ctx),
        "agent.status" => agent_status(ctx, params),
        "agent.delete" => agent_delete(ctx, params),
        "agent.bind" => agent_bind(ctx, params),
        "agent.unbind" => agent_unbind(ctx, params),
        "agent.refresh" => agent_refresh(ctx, params).await,
        "agent.self" => agent_self(ctx, principal),
        "agent.session-policy.set" => agent_session_policy_set(ctx, params),

        "setup.check" => setup_check(ctx),
        "setup.execute" => setup_execute(ctx, params),

        "boss.verify" => Ok(json!({ "ok": matches!(principal, Principal::Boss) })),

        "reaction.set" => reaction_set(ctx, params).await,

        m if m.starts_with("memory.") => Err(IpcError::Core(HiBossError::AdapterFailure {
            adapter: "memory".to_string(),
            reason: "semantic memory is not configured in this build".to_string(),
        })),

        other => Err(IpcError::Core(HiBossError::NotFound(format!("unknown method '{other}'")))),
    }
}

async fn daemon_status(ctx: &Context) -> Result<Value, IpcError> {
    let agents = ctx.store.list_agents()?;
    let mut running = 0;
    for agent in &agents {
        if ctx.store.get_current_running(&agent.name)?.is_some() {
            running += 1;
        }
    }
    Ok(json!({
        "agent_count": agents.len(),
        "running": running,
        "now_ms": Utc::now().timestamp_millis(),
    }))
}

// ---- envelope.* -----------------------------------------------------------

async fn envelope_send(ctx: &Context, principal: &Principal, params: Value) -> Result<Value, IpcError> {
    #[derive(serde::Deserialize)]
    struct SendParams {
        from: Option<String>,
        to: String,
        text: Option<String>,
        #[serde(default)]
        attachments: Vec<hiboss_core::types::Attachment>,
        reply_to: Option<String>,
        deliver_at: Option<String>,
        #[serde(default)]
        metadata: Metadata,
    }
    let p: SendParams = parse(params)?;

    let from = match (&p.from, principal) {
        (Some(name), Principal::Boss) => Address::agent(name.clone()),
        (None, Principal::Agent(name)) => Address::agent(name.clone()),
        (Some(name), Principal::Agent(actual)) if name == actual => Address::agent(name.clone()),
        (Some(_), Principal::Agent(_)) => {
            return Err(IpcError::Core(HiBossError::Unauthorized(
                "an agent may only send as itself".to_string(),
            )))
        }
        (None, Principal::Boss) => {
            return Err(IpcError::Core(HiBossError::InvalidInput(
                "boss-sent envelopes require an explicit 'from' agent".to_string(),
            )))
        }
    };

    let to = hiboss_core::types::parse_address(&p.to)?;
    p.metadata.reject_reserved()?;

    let boss_timezone = ctx.store.get_config()?.boss_timezone;
    let deliver_at = match p.deliver_at {
        Some(raw) => Some(hiboss_router::parse_deliver_at(&raw, &boss_timezone, Utc::now())?),
        None => None,
    };

    let reply_to = match p.reply_to {
        Some(raw) => Some(hiboss_core::types::EnvelopeId::parse(&raw)?),
        None => None,
    };

    let input = EnvelopeInput {
        from,
        to,
        from_boss: matches!(principal, Principal::Boss),
        content: Content {
            text: p.text,
            attachments: p.attachments,
        },
        reply_to,
        deliver_at,
        metadata: p.metadata,
    };

    let envelope = ctx.router.route_envelope(input).await?;
    Ok(serde_json::to_value(envelope).unwrap())
}

fn envelope_list(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    #[derive(serde::Deserialize)]
    struct ListParams {
        address: String,
        #[serde(rename = "box")]
        box_kind: Option<String>,
        status: Option<String>,
        limit: Option<i64>,
    }
    let p: ListParams = parse(params)?;
    let box_kind = match p.box_kind.as_deref() {
        Some("inbox") | None => Some(Box_::Inbox),
        Some("outbox") => Some(Box_::Outbox),
        Some(other) => {
            return Err(IpcError::Core(HiBossError::InvalidInput(format!("unknown box '{other}'"))))
        }
    };
    let status = p
        .status
        .map(|s| s.parse().map_err(HiBossError::InvalidInput))
        .transpose()?;

    let envelopes = ctx.store.list_envelopes(&ListEnvelopesQuery {
        address: p.address,
        box_kind,
        status,
        limit: p.limit,
    })?;
    Ok(serde_json::to_value(envelopes).unwrap())
}

fn envelope_get(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let id = require_str(&params, "id")?;
    match ctx.store.get_envelope(id)? {
        EnvelopeLookup::Found(e) => Ok(serde_json::to_value(e).unwrap()),
        EnvelopeLookup::NotFound => Err(IpcError::Core(HiBossError::NotFound(format!("envelope '{id}'")))),
        EnvelopeLookup::Ambiguous(candidates) => Err(IpcError::Ambiguous {
            prefix: id.to_string(),
            candidates: candidates.iter().map(envelope_to_candidate).collect(),
        }),
    }
}

// ---- cron.* -----------------------------------------------------------

fn resolve_cron_prefix(store: &Store, prefix: &str) -> Result<CronSchedule, IpcError> {
    let cleaned = prefix.replace('-', "").to_lowercase();
    let matches: Vec<CronSchedule> = store
        .list_cron_schedules()?
        .into_iter()
        .filter(|s| s.id.simple().to_string().starts_with(&cleaned))
        .collect();
    match matches.len() {
        0 => Err(IpcError::Core(HiBossError::NotFound(format!("cron schedule '{prefix}'")))),
        1 => Ok(matches.into_iter().next().unwrap()),
        _ => {
            if let Some(exact) = matches.iter().find(|s| s.id.simple().to_string() == cleaned) {
                Ok(exact.clone())
            } else {
                Err(IpcError::Ambiguous {
                    prefix: prefix.to_string(),
                    candidates: matches
                        .iter()
                        .map(|s| json!({ "id": s.id.simple().to_string()[..8], "cron": s.cron }))
                        .collect(),
                })
            }
        }
    }
}

fn cron_create(ctx: &Context, principal: &Principal, params: Value) -> Result<Value, IpcError> {
    #[derive(serde::Deserialize)]
    struct CreateParams {
        owner_agent: Option<String>,
        cron: String,
        timezone: Option<String>,
        to: String,
        text: Option<String>,
        #[serde(default)]
        attachments: Vec<hiboss_core::types::Attachment>,
        #[serde(default)]
        metadata: Metadata,
    }
    let p: CreateParams = parse(params)?;
    let owner_agent = match (&p.owner_agent, principal) {
        (Some(name), _) => name.clone(),
        (None, Principal::Agent(name)) => name.clone(),
        (None, Principal::Boss) => {
            return Err(IpcError::Core(HiBossError::InvalidInput(
                "boss-created schedules require an explicit 'owner_agent'".to_string(),
            )))
        }
    };
    p.metadata.reject_reserved()?;

    let schedule = CronSchedule {
        id: Uuid::new_v4(),
        owner_agent,
        cron: p.cron,
        timezone: p.timezone,
        enabled: true,
        pending_envelope_id: None,
        template: CronScheduleTemplate {
            to: hiboss_core::types::parse_address(&p.to)?,
            text: p.text,
            attachments: p.attachments,
            metadata: p.metadata,
        },
        created_at: Utc::now().timestamp_millis(),
    };
    ctx.store.create_cron_schedule(&schedule)?;
    let boss_timezone = ctx.store.get_config()?.boss_timezone;
    hiboss_scheduler::materializer::create(&ctx.store, &schedule, &boss_timezone)?;
    Ok(serde_json::to_value(schedule).unwrap())
}

fn cron_list(ctx: &Context) -> Result<Value, IpcError> {
    Ok(serde_json::to_value(ctx.store.list_cron_schedules()?).unwrap())
}

fn cron_set_enabled(ctx: &Context, params: Value, enabled: bool) -> Result<Value, IpcError> {
    let id = require_str(&params, "id")?;
    let schedule = resolve_cron_prefix(&ctx.store, id)?;
    if enabled {
        ctx.store.set_cron_enabled(schedule.id, true)?;
        if schedule.pending_envelope_id.is_none() {
            let boss_timezone = ctx.store.get_config()?.boss_timezone;
            let mut refreshed = schedule.clone();
            refreshed.enabled = true;
            hiboss_scheduler::materializer::create(&ctx.store, &refreshed, &boss_timezone)?;
        }
    } else {
        hiboss_scheduler::materializer::disable(&ctx.store, &schedule)?;
    }
    Ok(json!({ "id": schedule.id.to_string(), "enabled": enabled }))
}

fn cron_delete(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let id = require_str(&params, "id")?;
    let schedule = resolve_cron_prefix(&ctx.store, id)?;
    hiboss_scheduler::materializer::delete(&ctx.store, &schedule)?;
    Ok(json!({ "deleted": true }))
}

fn cron_explain(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    #[derive(serde::Deserialize)]
    struct ExplainParams {
        cron: String,
        timezone: Option<String>,
        #[serde(default = "default_explain_count")]
        count: usize,
    }
    fn default_explain_count() -> usize {
        5
    }
    let p: ExplainParams = parse(params)?;
    let boss_timezone = ctx.store.get_config()?.boss_timezone;
    let fires = hiboss_scheduler::materializer::explain(&p.cron, p.timezone.as_deref(), &boss_timezone, p.count)?;
    Ok(json!({ "fires": fires.iter().map(|f| f.timestamp_millis()).collect::<Vec<_>>() }))
}

// ---- agent.* -----------------------------------------------------------

fn agent_register(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    #[derive(serde::Deserialize)]
    struct RegisterParams {
        name: String,
        token: Option<String>,
        description: Option<String>,
        workspace: Option<String>,
        #[serde(default)]
        provider: ProviderConfig,
        #[serde(default = "default_permission_level")]
        permission_level: PermissionLevel,
        #[serde(default)]
        session_policy: SessionPolicy,
    }
    fn default_permission_level() -> PermissionLevel {
        PermissionLevel::Standard
    }
    let p: RegisterParams = parse(params)?;
    if !hiboss_core::types::is_valid_agent_name(&p.name) {
        return Err(IpcError::Core(HiBossError::InvalidInput(format!("invalid agent name '{}'", p.name))));
    }
    let token = p.token.unwrap_or_else(|| Uuid::new_v4().to_string().replace('-', ""));
    let agent = Agent {
        name: p.name,
        token,
        description: p.description,
        workspace: p.workspace,
        provider: p.provider,
        permission_level: p.permission_level,
        session_policy: p.session_policy,
        metadata: Metadata::new(),
        created_at: Utc::now().timestamp_millis(),
    };
    ctx.store.create_agent(&agent)?;
    Ok(serde_json::to_value(agent).unwrap())
}

fn agent_set(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let name = require_str(&params, "name")?.to_string();
    if let Some(provider) = params.get("provider") {
        let provider: ProviderConfig = serde_json::from_value(provider.clone())
            .map_err(|e| HiBossError::InvalidInput(e.to_string()))?;
        ctx.store.set_agent_provider(&name, &provider)?;
    }
    if let Some(level) = params.get("permission_level").and_then(Value::as_str) {
        let level: PermissionLevel = level.parse().map_err(HiBossError::InvalidInput)?;
        ctx.store.set_agent_permission_level(&name, level)?;
    }
    Ok(serde_json::to_value(ctx.store.get_agent(&name)?).unwrap())
}

fn agent_list(ctx: &Context) -> Result<Value, IpcError> {
    Ok(serde_json::to_value(ctx.store.list_agents()?).unwrap())
}

fn agent_status(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let name = require_str(&params, "name")?;
    let agent = ctx.store.get_agent(name)?;
    let running = ctx.store.get_current_running(name)?;
    let last_finished = ctx.store.get_last_finished(name)?;
    let due = ctx.store.count_due_pending_for_agent(name)?;
    Ok(json!({
        "agent": agent,
        "running": running,
        "last_finished": last_finished,
        "due_pending": due,
    }))
}

fn agent_delete(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let name = require_str(&params, "name")?;
    ctx.store.delete_bindings_for_agent(name)?;
    ctx.store.delete_agent(name)?;
    Ok(json!({ "deleted": true }))
}

fn agent_bind(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    #[derive(serde::Deserialize)]
    struct BindParams {
        name: String,
        adapter: String,
        adapter_token: String,
    }
    let p: BindParams = parse(params)?;
    ctx.store.create_binding(&Binding {
        agent_name: p.name,
        adapter_type: p.adapter,
        adapter_token: p.adapter_token,
        created_at: Utc::now().timestamp_millis(),
    })?;
    Ok(json!({ "bound": true }))
}

fn agent_unbind(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let adapter = require_str(&params, "adapter")?;
    let adapter_token = require_str(&params, "adapter_token")?;
    ctx.store.delete_binding(adapter, adapter_token)?;
    Ok(json!({ "unbound": true }))
}

async fn agent_refresh(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let name = require_str(&params, "name")?.to_string();
    let reason = params
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or(REFRESH_REASON_MANUAL_NEW)
        .to_string();
    ctx.executor.request_session_refresh(&name, &reason).await;
    Ok(json!({ "requested": true }))
}

fn agent_self(ctx: &Context, principal: &Principal) -> Result<Value, IpcError> {
    match principal {
        Principal::Agent(name) => Ok(serde_json::to_value(ctx.store.get_agent(name)?).unwrap()),
        Principal::Boss => Err(IpcError::Core(HiBossError::InvalidInput(
            "'agent.self' is only meaningful for an agent principal".to_string(),
        ))),
    }
}

fn agent_session_policy_set(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let name = require_str(&params, "name")?.to_string();
    let policy: SessionPolicy = params
        .get("session_policy")
        .cloned()
        .ok_or_else(|| HiBossError::InvalidInput("missing field 'session_policy'".to_string()))
        .and_then(|v| serde_json::from_value(v).map_err(|e| HiBossError::InvalidInput(e.to_string())))?;
    if let Some(hhmm) = &policy.daily_reset_at {
        let boss_timezone = ctx.store.get_config()?.boss_timezone;
        hiboss_scheduler::resolve_timezone(Some(&boss_timezone), &boss_timezone)?;
        if hhmm.split(':').count() != 2 {
            return Err(IpcError::Core(HiBossError::InvalidInput(format!(
                "invalid daily_reset_at '{hhmm}', expected HH:MM"
            ))));
        }
    }
    ctx.store.set_agent_session_policy(&name, &policy)?;
    Ok(serde_json::to_value(ctx.store.get_agent(&name)?).unwrap())
}

// ---- setup.* / boss.* ---------------------------------------------------

fn setup_check(ctx: &Context) -> Result<Value, IpcError> {
    let config = ctx.store.get_config()?;
    Ok(json!({
        "setup_completed": config.setup_completed,
        "boss_name": config.boss_name,
        "boss_timezone": config.boss_timezone,
    }))
}

fn setup_execute(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    #[derive(serde::Deserialize)]
    struct SetupParams {
        boss_name: String,
        boss_timezone: String,
        boss_token: String,
    }
    let p: SetupParams = parse(params)?;
    hiboss_scheduler::resolve_timezone(Some(&p.boss_timezone), &p.boss_timezone)?;
    ctx.store.set_boss_name(&p.boss_name)?;
    ctx.store.set_boss_timezone(&p.boss_timezone)?;
    ctx.store.set_boss_token_hash(&hiboss_core::hash_token(&p.boss_token))?;
    ctx.store.set_setup_completed(true)?;
    Ok(json!({ "setup_completed": true }))
}

// ---- reaction.* ---------------------------------------------------------

async fn reaction_set(ctx: &Context, params: Value) -> Result<Value, IpcError> {
    let adapter = require_str(&params, "adapter")?;
    let message_id = require_str(&params, "message_id")?;
    let emoji = require_str(&params, "emoji")?;
    ctx.router.react(adapter, message_id, emoji).await?;
    Ok(json!({ "reacted": true }))
}
