use std::collections::HashMap;

use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::{channel::Channel, error::AdapterError, types::ChannelStatus};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10%).
const JITTER_FRACTION: f64 = 0.10;

/// Manages the collection of adapters this daemon is configured with.
///
/// Adapters are stored by their [`Channel::name`] and can be started,
/// stopped, or queried as a group. Applies exponential backoff with jitter
/// when a connection attempt fails.
pub struct ChannelManager {
    channels: HashMap<String, Box<dyn Channel + Send + Sync>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register an adapter. If one with the same name is already registered
    /// it is replaced.
    pub fn register(&mut self, channel: Box<dyn Channel + Send + Sync>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registering adapter");
        self.channels.insert(name, channel);
    }

    /// Start all registered adapters, sequentially, with backoff per adapter.
    pub async fn start_all(&mut self) {
        for (name, channel) in self.channels.iter_mut() {
            info!(channel = %name, "starting adapter");
            if let Err(e) = start_with_backoff(name, channel.as_mut()).await {
                error!(channel = %name, error = %e, "failed to start adapter after retries");
            }
        }
    }

    /// Stop all registered adapters. Errors are logged but do not abort
    /// stopping the remaining adapters.
    pub async fn stop_all(&mut self) {
        for (name, channel) in self.channels.iter_mut() {
            info!(channel = %name, "stopping adapter");
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "error while stopping adapter");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&(dyn Channel + Send + Sync)> {
        self.channels.get(name).map(|b| b.as_ref())
    }

    /// Current [`ChannelStatus`] for every registered adapter, sorted by name.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> = self
            .channels
            .iter()
            .map(|(name, ch)| (name.clone(), ch.status()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt to start a single adapter with exponential backoff and ±10% jitter.
/// Schedule: 5s -> 10s -> 20s -> ... -> 300s (cap), up to `MAX_ATTEMPTS` tries.
async fn start_with_backoff(name: &str, channel: &mut dyn Channel) -> Result<(), AdapterError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.start().await {
            Ok(()) => {
                info!(channel = %name, attempt, "adapter started successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "adapter start failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}
