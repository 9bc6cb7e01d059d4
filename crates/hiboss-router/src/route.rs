use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hiboss_channels::ChannelManager;
use hiboss_core::types::{Address, Envelope, EnvelopeInput};
use hiboss_scheduler::{AgentTrigger, ChannelDispatcher, SchedulerWaker};
use hiboss_store::Store;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::error::{Result, RouterError};

/// Validates, persists, and dispatches envelopes; the only subsystem that
/// knows both the Store and the channel adapters. Immediate agent inbox
/// delivery is a signal, not a push — the Executor pulls due envelopes
/// itself once notified.
pub struct Router {
    store: Arc<Store>,
    channels: Arc<RwLock<ChannelManager>>,
    agent_trigger: Arc<dyn AgentTrigger>,
    waker: RwLock<Option<SchedulerWaker>>,
}

impl Router {
    pub fn new(
        store: Arc<Store>,
        channels: Arc<RwLock<ChannelManager>>,
        agent_trigger: Arc<dyn AgentTrigger>,
    ) -> Self {
        Self {
            store,
            channels,
            agent_trigger,
            waker: RwLock::new(None),
        }
    }

    /// Wired in after the scheduler engine exists (construction order:
    /// store -> router -> scheduler -> router.set_waker).
    pub async fn set_waker(&self, waker: SchedulerWaker) {
        *self.waker.write().await = Some(waker);
    }

    /// Validate an envelope's addressing per the construction rules, then
    /// persist it. Immediate envelopes (`deliver_at` unset or already due)
    /// are dispatched inline; future ones are left for the Scheduler.
    #[instrument(skip(self, input))]
    pub async fn route_envelope(&self, input: EnvelopeInput) -> Result<Envelope> {
        self.validate_construction(&input)?;

        let has_future_deliver_at = input
            .deliver_at
            .map(|at| at > Utc::now().timestamp_millis())
            .unwrap_or(false);

        let envelope = self.store.create_envelope(input)?;

        if has_future_deliver_at {
            if let Some(waker) = self.waker.read().await.as_ref() {
                waker.notify_envelope_created();
            }
            return Ok(envelope);
        }

        match &envelope.to {
            Address::Channel { .. } => {
                self.deliver_channel_envelope(&envelope).await;
            }
            Address::Agent { name } => {
                self.agent_trigger.check_and_run(name).await;
            }
        }

        Ok(envelope)
    }

    /// `to.channel` requires `from.agent`; when `to` is a channel the
    /// referenced sending agent (the impersonated one, if any) must hold a
    /// binding for that adapter. Binding is required regardless of who is
    /// privileged to impersonate — only *whether* impersonation is allowed
    /// is an IPC-layer permission concern, not this invariant.
    fn validate_construction(&self, input: &EnvelopeInput) -> Result<()> {
        if let Address::Channel { adapter, .. } = &input.to {
            let sender_name = match &input.from {
                Address::Agent { name } => name,
                Address::Channel { .. } => {
                    return Err(RouterError::InvalidInput(
                        "channel-to-channel envelopes are not allowed: to.channel requires from.agent".to_string(),
                    ));
                }
            };

            let binding = self.store.find_binding_for_adapter(sender_name, adapter)?;
            if binding.is_none() {
                return Err(RouterError::InvalidInput(format!(
                    "agent '{sender_name}' has no binding for adapter '{adapter}'"
                )));
            }
        }
        Ok(())
    }

    /// `reaction.set`: react to a previously sent/received message through
    /// the bound adapter.
    pub async fn react(&self, adapter: &str, message_id: &str, emoji: &str) -> Result<()> {
        let channels = self.channels.read().await;
        let channel = channels
            .get(adapter)
            .ok_or_else(|| RouterError::UnknownAdapter(adapter.to_string()))?;
        channel.react(message_id, emoji).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelDispatcher for Router {
    /// Look up the sending agent's binding, invoke the adapter's `send`,
    /// and mark the envelope `done` unconditionally — channel delivery is
    /// terminal, never auto-retried. Failures are recorded in
    /// `lastDeliveryError` instead of being surfaced as an error.
    async fn deliver_channel_envelope(&self, envelope: &Envelope) {
        let (adapter, result) = match self.try_deliver(envelope).await {
            Ok(adapter) => (adapter, Ok(())),
            Err((adapter, e)) => (adapter, Err(e)),
        };

        let delivery_note = result.as_ref().err().map(|e: &RouterError| e.to_string());
        if let Err(e) =
            hiboss_scheduler::materializer::complete_envelope(&self.store, envelope, delivery_note.as_deref())
        {
            warn!(envelope = %envelope.id, error = %e, "failed to mark delivered envelope done");
            return;
        }

        match result {
            Ok(()) => info!(envelope = %envelope.id, adapter = %adapter, "channel envelope delivered"),
            Err(e) => warn!(envelope = %envelope.id, adapter = %adapter, error = %e, "channel delivery failed, envelope terminated"),
        }
    }
}

impl Router {
    async fn try_deliver(&self, envelope: &Envelope) -> std::result::Result<String, (String, RouterError)> {
        let Address::Channel { adapter, .. } = &envelope.to else {
            return Err(("unknown".to_string(), RouterError::InvalidInput(
                "deliver_channel_envelope called on a non-channel envelope".to_string(),
            )));
        };

        let sender_name = match &envelope.from {
            Address::Agent { name } => name.clone(),
            Address::Channel { .. } => {
                return Err((
                    adapter.clone(),
                    RouterError::InvalidInput(
                        "channel-to-channel envelope cannot be delivered".to_string(),
                    ),
                ))
            }
        };

        let binding = self
            .store
            .find_binding_for_adapter(&sender_name, adapter)
            .map_err(|e| (adapter.clone(), RouterError::from(e)))?;
        if binding.is_none() {
            return Err((
                adapter.clone(),
                RouterError::InvalidInput(format!(
                    "agent '{sender_name}' has no binding for adapter '{adapter}'"
                )),
            ));
        }

        let channels = self.channels.read().await;
        let channel = channels
            .get(adapter)
            .ok_or_else(|| (adapter.clone(), RouterError::UnknownAdapter(adapter.clone())))?;
        channel
            .send(envelope)
            .await
            .map_err(|e| (adapter.clone(), RouterError::from(e)))?;
        Ok(adapter.clone())
    }
}

/// Prevent unbounded retries when the Scheduler reports due work for an
/// agent name with no corresponding row: mark its due pending envelopes
/// `done` with a terminal error instead of triggering the (nonexistent)
/// agent forever.
pub fn fail_missing_agent_envelopes(store: &Store, agent_name: &str) -> Result<()> {
    let due = store.pending_for_agent(agent_name, i64::MAX)?;
    let note = format!("agent '{agent_name}' is not registered");
    for envelope in &due {
        hiboss_scheduler::materializer::complete_envelope(store, envelope, Some(&note))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiboss_core::types::{Content, Metadata, PermissionLevel, ProviderConfig, SessionPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTrigger(AtomicUsize);

    #[async_trait]
    impl AgentTrigger for CountingTrigger {
        async fn check_and_run(&self, _agent_name: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_input(from: Address, to: Address) -> EnvelopeInput {
        EnvelopeInput {
            from,
            to,
            from_boss: false,
            content: Content {
                text: Some("hi".to_string()),
                attachments: Vec::new(),
            },
            reply_to: None,
            deliver_at: None,
            metadata: Metadata::new(),
        }
    }

    fn new_router(trigger: Arc<CountingTrigger>) -> (Arc<Store>, Router) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let channels = Arc::new(RwLock::new(ChannelManager::new()));
        let router = Router::new(store.clone(), channels, trigger);
        (store, router)
    }

    #[tokio::test]
    async fn immediate_agent_envelope_triggers_executor() {
        let trigger = Arc::new(CountingTrigger(AtomicUsize::new(0)));
        let (store, router) = new_router(trigger.clone());
        store
            .create_agent(&hiboss_core::types::Agent {
                name: "nex".to_string(),
                token: "tok".to_string(),
                description: None,
                workspace: None,
                provider: ProviderConfig::default(),
                permission_level: PermissionLevel::Standard,
                session_policy: SessionPolicy::default(),
                metadata: Metadata::new(),
                created_at: 0,
            })
            .unwrap();

        let envelope = router
            .route_envelope(sample_input(Address::agent("boss"), Address::agent("nex")))
            .await
            .unwrap();

        assert_eq!(envelope.status, hiboss_core::types::EnvelopeStatus::Pending);
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_destination_without_binding_is_rejected() {
        let trigger = Arc::new(CountingTrigger(AtomicUsize::new(0)));
        let (_store, router) = new_router(trigger);

        let result = router
            .route_envelope(sample_input(
                Address::agent("nex"),
                Address::channel("telegram", "123"),
            ))
            .await;

        assert!(matches!(result, Err(RouterError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn channel_to_channel_is_rejected() {
        let trigger = Arc::new(CountingTrigger(AtomicUsize::new(0)));
        let (_store, router) = new_router(trigger);

        let result = router
            .route_envelope(sample_input(
                Address::channel("telegram", "123"),
                Address::channel("telegram", "456"),
            ))
            .await;

        assert!(matches!(result, Err(RouterError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn future_deliver_at_persists_without_dispatch() {
        let trigger = Arc::new(CountingTrigger(AtomicUsize::new(0)));
        let (_store, router) = new_router(trigger.clone());

        let mut input = sample_input(Address::agent("boss"), Address::agent("nex"));
        input.deliver_at = Some(Utc::now().timestamp_millis() + 60_000);
        let envelope = router.route_envelope(input).await.unwrap();

        assert_eq!(envelope.status, hiboss_core::types::EnvelopeStatus::Pending);
        assert_eq!(trigger.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deliver_channel_envelope_without_adapter_terminates_with_error() {
        let trigger = Arc::new(CountingTrigger(AtomicUsize::new(0)));
        let (store, router) = new_router(trigger);
        store
            .create_agent(&hiboss_core::types::Agent {
                name: "nex".to_string(),
                token: "tok".to_string(),
                description: None,
                workspace: None,
                provider: ProviderConfig::default(),
                permission_level: PermissionLevel::Standard,
                session_policy: SessionPolicy::default(),
                metadata: Metadata::new(),
                created_at: 0,
            })
            .unwrap();
        store
            .create_binding(&hiboss_core::types::Binding {
                agent_name: "nex".to_string(),
                adapter_type: "telegram".to_string(),
                adapter_token: "chat-1".to_string(),
                created_at: 0,
            })
            .unwrap();

        let envelope = store
            .create_envelope(sample_input(
                Address::agent("nex"),
                Address::channel("telegram", "chat-1"),
            ))
            .unwrap();

        router.deliver_channel_envelope(&envelope).await;

        match store.get_envelope(&envelope.id.to_hex()).unwrap() {
            hiboss_store::EnvelopeLookup::Found(e) => {
                assert_eq!(e.status, hiboss_core::types::EnvelopeStatus::Done);
                assert!(e.metadata.get("lastDeliveryError").is_some());
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }
}
