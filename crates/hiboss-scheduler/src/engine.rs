use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hiboss_core::types::Envelope;
use hiboss_store::Store;
use tokio::sync::{watch, Notify};
use tracing::{info, instrument, warn};

use crate::materializer;

/// Batch size for due-channel-envelope delivery per tick.
const CHANNEL_BATCH_LIMIT: i64 = 50;

/// Timers longer than this are clamped and re-evaluated rather than armed
/// directly, per the "wake in ~24 days and re-evaluate" fallback.
const MAX_WAKE: Duration = Duration::from_secs(24 * 24 * 60 * 60);

/// Sink for due outbound channel envelopes. Implemented by the Router so the
/// Scheduler never depends on it directly.
#[async_trait]
pub trait ChannelDispatcher: Send + Sync {
    async fn deliver_channel_envelope(&self, envelope: &Envelope);
}

/// Signals the Executor that an agent has due pending work. Implemented by
/// the Executor; non-blocking by contract (coalesces into "recheck needed"
/// if the agent is already running).
#[async_trait]
pub trait AgentTrigger: Send + Sync {
    async fn check_and_run(&self, agent_name: &str);
}

/// Single-threaded tick loop driving channel delivery, agent triggering,
/// and cron materialization. Cooperative with the host runtime: one `run()`
/// task, woken by a timer or an explicit `on_envelope_created` notification.
pub struct SchedulerEngine {
    store: Arc<Store>,
    dispatcher: Arc<dyn ChannelDispatcher>,
    trigger: Arc<dyn AgentTrigger>,
    wake: Notify,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<Store>,
        dispatcher: Arc<dyn ChannelDispatcher>,
        trigger: Arc<dyn AgentTrigger>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            trigger,
            wake: Notify::new(),
        }
    }

    /// A handle callers can clone cheaply to re-arm the timer without
    /// holding a reference to the whole engine.
    pub fn waker(self: &Arc<Self>) -> SchedulerWaker {
        SchedulerWaker { engine: self.clone() }
    }

    /// Run until `shutdown` reports `true`. Runs an immediate startup tick
    /// (which performs the cron misfire sweep), then loops on a re-armable
    /// timer.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        self.tick(true).await;
        loop {
            let wake_in = self.next_wake_duration();
            tokio::select! {
                _ = tokio::time::sleep(wake_in) => {
                    self.tick(false).await;
                }
                _ = self.wake.notified() => {
                    self.tick(false).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self, is_startup: bool) {
        if is_startup {
            if let Err(e) = self.sweep_misfires() {
                warn!(error = %e, "cron misfire sweep failed");
            }
        }

        if let Err(e) = self.deliver_due_channel_envelopes().await {
            warn!(error = %e, "channel delivery tick failed");
        }

        if let Err(e) = self.trigger_due_agents().await {
            warn!(error = %e, "agent trigger tick failed");
        }
    }

    /// Step 1: for every enabled schedule whose materialized envelope is
    /// already due, mark it done (missed) and advance strictly after now —
    /// this runs once, before any delivery, so a cold-start daemon never
    /// replays a backlog of occurrences.
    fn sweep_misfires(&self) -> crate::error::Result<()> {
        let boss_timezone = self.store.get_config()?.boss_timezone;
        let now = chrono::Utc::now().timestamp_millis();

        for schedule in self.store.list_enabled_cron_schedules()? {
            let Some(pending_id) = schedule.pending_envelope_id else {
                continue;
            };
            let pending = match self.store.get_envelope(&pending_id.to_hex())? {
                hiboss_store::EnvelopeLookup::Found(e) => e,
                _ => continue,
            };
            if !pending.is_due(now) {
                continue;
            }
            info!(cron_id = %schedule.id, envelope = %pending.id, "sweeping missed cron occurrence");
            materializer::advance(
                &self.store,
                &schedule,
                pending.id,
                Some("missed (misfire sweep)"),
                &boss_timezone,
            )?;
        }
        Ok(())
    }

    /// Step 2: deliver due `to=channel:*` envelopes via the Router.
    async fn deliver_due_channel_envelopes(&self) -> crate::error::Result<()> {
        let due = self.store.list_due_channel_envelopes(CHANNEL_BATCH_LIMIT)?;
        for envelope in due {
            self.dispatcher.deliver_channel_envelope(&envelope).await;
        }
        Ok(())
    }

    /// Step 3: ask the Executor to check each agent with due pending work.
    /// Non-blocking by the trait's own contract.
    async fn trigger_due_agents(&self) -> crate::error::Result<()> {
        for agent_name in self.store.list_agents_with_due_envelopes()? {
            self.trigger.check_and_run(&agent_name).await;
        }
        Ok(())
    }

    /// Step 4: `max(0, deliver_at - now)`, clamped to `MAX_WAKE`. With no
    /// scheduled envelope the engine idles on `MAX_WAKE` and relies on
    /// `notify_envelope_created` to re-arm early.
    fn next_wake_duration(&self) -> Duration {
        match self.store.next_scheduled_envelope() {
            Ok(Some(envelope)) => {
                let now = chrono::Utc::now().timestamp_millis();
                let deliver_at = envelope.deliver_at.unwrap_or(now);
                let millis = (deliver_at - now).max(0) as u64;
                Duration::from_millis(millis).min(MAX_WAKE)
            }
            Ok(None) => MAX_WAKE,
            Err(e) => {
                warn!(error = %e, "failed to query next scheduled envelope, falling back to max wake");
                MAX_WAKE
            }
        }
    }
}

/// Cheap handle used by the Router to re-arm the scheduler's timer
/// (step 5: a newly created envelope with an earlier `deliver_at` than the
/// currently armed wake).
#[derive(Clone)]
pub struct SchedulerWaker {
    engine: Arc<SchedulerEngine>,
}

impl SchedulerWaker {
    pub fn notify_envelope_created(&self) {
        self.engine.wake.notify_one();
    }
}
