use chrono::Utc;
use hiboss_core::types::{
    Address, Content, CronSchedule, Envelope, EnvelopeInput, Metadata, META_CRON_SCHEDULE_ID,
};
use hiboss_store::{EnvelopeLookup, Store};
use tracing::instrument;

use crate::error::Result;
use crate::schedule::compute_next_fire;

/// Builds the envelope materialized for a cron schedule's next occurrence.
fn build_input(schedule: &CronSchedule, deliver_at: i64) -> EnvelopeInput {
    let mut metadata = schedule.template.metadata.clone();
    metadata.insert(META_CRON_SCHEDULE_ID, serde_json::json!(schedule.id.to_string()));

    EnvelopeInput {
        from: Address::agent(schedule.owner_agent.clone()),
        to: schedule.template.to.clone(),
        from_boss: false,
        content: Content {
            text: schedule.template.text.clone(),
            attachments: schedule.template.attachments.clone(),
        },
        reply_to: None,
        deliver_at: Some(deliver_at),
        metadata,
    }
}

/// Materialize a schedule's next occurrence, persisting the envelope's id as
/// `pending_envelope_id`. Called on `cron.create` and after `advance`.
#[instrument(skip(store, schedule), fields(cron_id = %schedule.id))]
pub fn create(store: &Store, schedule: &CronSchedule, boss_timezone: &str) -> Result<Envelope> {
    let next_fire = compute_next_fire(
        &schedule.cron,
        schedule.timezone.as_deref(),
        boss_timezone,
        Utc::now(),
    )?;
    let input = build_input(schedule, next_fire.timestamp_millis());
    let envelope = store.create_envelope(input)?;
    store.set_pending_envelope_id(schedule.id, Some(envelope.id))?;
    Ok(envelope)
}

/// Advance a schedule after its materialized envelope became `done`: marks
/// it done (idempotent) and materializes the next occurrence atomically, so
/// no observer ever sees the schedule with zero or two pending envelopes.
#[instrument(skip(store, schedule, delivery_note), fields(cron_id = %schedule.id))]
pub fn advance(
    store: &Store,
    schedule: &CronSchedule,
    finished_envelope_id: hiboss_core::types::EnvelopeId,
    delivery_note: Option<&str>,
    boss_timezone: &str,
) -> Result<Option<Envelope>> {
    if !schedule.enabled {
        store.set_pending_envelope_id(schedule.id, None)?;
        return Ok(None);
    }

    let next_fire = compute_next_fire(
        &schedule.cron,
        schedule.timezone.as_deref(),
        boss_timezone,
        Utc::now(),
    )?;
    let input = build_input(schedule, next_fire.timestamp_millis());
    let next_envelope = Envelope {
        id: hiboss_core::types::EnvelopeId::new(),
        from: input.from,
        to: input.to,
        from_boss: input.from_boss,
        content: input.content,
        reply_to: input.reply_to,
        deliver_at: input.deliver_at,
        status: hiboss_core::types::EnvelopeStatus::Pending,
        created_at: Utc::now().timestamp_millis(),
        metadata: input.metadata,
    };

    let materialized = store.advance_cron_schedule(
        schedule.id,
        finished_envelope_id,
        delivery_note,
        Some(next_envelope),
    )?;
    Ok(materialized)
}

/// The single completion path every envelope consumer (agent run, channel
/// delivery, missing-agent termination) must go through. If `envelope` was
/// materialized by a cron schedule, advancing it happens atomically with
/// marking it done, so a schedule's `pending_envelope_id` never points at an
/// already-finished envelope. Otherwise this is a plain `mark_envelope_done`.
#[instrument(skip(store, envelope, delivery_note), fields(envelope_id = %envelope.id))]
pub fn complete_envelope(store: &Store, envelope: &Envelope, delivery_note: Option<&str>) -> Result<Envelope> {
    let owning_schedule = envelope
        .metadata
        .cron_schedule_id()
        .and_then(|id| uuid::Uuid::parse_str(id).ok())
        .and_then(|id| store.get_cron_schedule(id).ok());

    let Some(schedule) = owning_schedule else {
        return Ok(store.mark_envelope_done(envelope.id, delivery_note.map(str::to_string))?);
    };

    let boss_timezone = store.get_config()?.boss_timezone;
    advance(store, &schedule, envelope.id, delivery_note, &boss_timezone)?;

    match store.get_envelope(&envelope.id.to_hex())? {
        EnvelopeLookup::Found(e) => Ok(e),
        _ => unreachable!("advance() just marked this envelope done"),
    }
}

/// Disable a schedule: stop future materialization and cancel any envelope
/// still pending for it.
#[instrument(skip(store))]
pub fn disable(store: &Store, schedule: &CronSchedule) -> Result<()> {
    store.set_cron_enabled(schedule.id, false)?;
    if let Some(pending_id) = schedule.pending_envelope_id {
        store.mark_envelope_done(pending_id, Some("cron schedule disabled".to_string()))?;
        store.set_pending_envelope_id(schedule.id, None)?;
    }
    Ok(())
}

/// Delete a schedule outright, cancelling any pending materialized envelope first.
#[instrument(skip(store))]
pub fn delete(store: &Store, schedule: &CronSchedule) -> Result<()> {
    if let Some(pending_id) = schedule.pending_envelope_id {
        store.mark_envelope_done(pending_id, Some("cron schedule deleted".to_string()))?;
    }
    store.delete_cron_schedule(schedule.id)?;
    Ok(())
}

/// Validate and preview the next `count` fire times without touching the store.
pub fn explain(
    cron_expr: &str,
    timezone: Option<&str>,
    boss_timezone: &str,
    count: usize,
) -> Result<Vec<chrono::DateTime<Utc>>> {
    crate::schedule::explain(cron_expr, timezone, boss_timezone, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiboss_core::types::{Attachment, CronScheduleTemplate};

    fn sample_schedule(store: &Store) -> CronSchedule {
        let agent = hiboss_core::types::Agent {
            name: "nex".to_string(),
            token: "tok".to_string(),
            description: None,
            workspace: None,
            provider: Default::default(),
            permission_level: hiboss_core::types::PermissionLevel::Standard,
            session_policy: Default::default(),
            metadata: Metadata::new(),
            created_at: 0,
        };
        store.create_agent(&agent).unwrap();

        CronSchedule {
            id: uuid::Uuid::new_v4(),
            owner_agent: "nex".to_string(),
            cron: "*/2 * * * *".to_string(),
            timezone: None,
            enabled: true,
            pending_envelope_id: None,
            template: CronScheduleTemplate {
                to: Address::agent("nex".to_string()),
                text: Some("tick".to_string()),
                attachments: Vec::<Attachment>::new(),
                metadata: Metadata::new(),
            },
            created_at: 0,
        }
    }

    #[test]
    fn create_materializes_one_pending_envelope() {
        let store = Store::open_in_memory().unwrap();
        let schedule = sample_schedule(&store);
        store.create_cron_schedule(&schedule).unwrap();

        let envelope = create(&store, &schedule, "UTC").unwrap();
        assert!(envelope.deliver_at.unwrap() > Utc::now().timestamp_millis());
        assert_eq!(
            envelope.metadata.cron_schedule_id(),
            Some(schedule.id.to_string()).as_deref()
        );

        let stored = store.get_cron_schedule(schedule.id).unwrap();
        assert_eq!(stored.pending_envelope_id, Some(envelope.id));
    }

    #[test]
    fn advance_replaces_pending_envelope() {
        let store = Store::open_in_memory().unwrap();
        let schedule = sample_schedule(&store);
        store.create_cron_schedule(&schedule).unwrap();
        let first = create(&store, &schedule, "UTC").unwrap();
        let schedule = store.get_cron_schedule(schedule.id).unwrap();

        let second = advance(&store, &schedule, first.id, None, "UTC")
            .unwrap()
            .expect("next occurrence materialized");
        assert_ne!(first.id, second.id);

        let done = store.get_envelope(&first.id.to_hex()).unwrap();
        match done {
            hiboss_store::EnvelopeLookup::Found(e) => {
                assert_eq!(e.status, hiboss_core::types::EnvelopeStatus::Done)
            }
            other => panic!("expected Found, got {other:?}"),
        }

        let stored = store.get_cron_schedule(schedule.id).unwrap();
        assert_eq!(stored.pending_envelope_id, Some(second.id));
    }

    #[test]
    fn disable_cancels_pending_envelope() {
        let store = Store::open_in_memory().unwrap();
        let schedule = sample_schedule(&store);
        store.create_cron_schedule(&schedule).unwrap();
        let envelope = create(&store, &schedule, "UTC").unwrap();
        let schedule = store.get_cron_schedule(schedule.id).unwrap();

        disable(&store, &schedule).unwrap();

        let stored = store.get_cron_schedule(schedule.id).unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.pending_envelope_id, None);

        match store.get_envelope(&envelope.id.to_hex()).unwrap() {
            hiboss_store::EnvelopeLookup::Found(e) => {
                assert_eq!(e.status, hiboss_core::types::EnvelopeStatus::Done)
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }
}
