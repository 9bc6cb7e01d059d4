use std::sync::Arc;

use clap::Parser;
use hiboss_core::config::HiBossConfig;
use hiboss_executor::{EchoProvider, Executor};
use hiboss_ipc::Context;
use hiboss_router::Router;
use hiboss_scheduler::{AgentTrigger, SchedulerEngine};
use hiboss_store::Store;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

mod invariants;
mod lock;

#[derive(Parser)]
#[command(name = "hiboss-daemon", about = "Durable multi-agent messaging daemon")]
struct Cli {
    /// Path to hiboss.toml. Defaults to ~/.hiboss/hiboss.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "hiboss_daemon=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = HiBossConfig::load(cli.config.as_deref())?;

    std::fs::create_dir_all(config.daemon_dir())?;
    std::fs::create_dir_all(config.agents_dir())?;
    std::fs::create_dir_all(config.media_dir())?;
    info!(root = %config.root, "data directories ready");

    let store = Arc::new(Store::open(&config.db_path())?);

    let daemon_lock = Arc::new(lock::acquire(&config.lock_path(), &config.pid_path())?);
    invariants::validate_speaker_leader(&store)?;

    // Provider SDK integrations are out of scope here — only the
    // open/resume/run-turn contract is specified. `EchoProvider` is the
    // only concrete `AgentProvider` this binary ships with; a real backend
    // plugs in by implementing the trait and swapping this construction.
    let provider = Arc::new(EchoProvider);
    let executor = Arc::new(Executor::new(store.clone(), provider));

    let channels = Arc::new(RwLock::new(hiboss_channels::ChannelManager::new()));
    let router = Arc::new(Router::new(store.clone(), channels, executor.clone()));

    let scheduler = Arc::new(SchedulerEngine::new(store.clone(), router.clone(), executor.clone()));
    router.set_waker(scheduler.waker()).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_task = tokio::spawn({
        let daemon_lock = daemon_lock.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let period = std::time::Duration::from_secs(config.daemon.lock_heartbeat_secs);
        async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = daemon_lock.refresh_heartbeat() {
                            warn!(error = %e, "failed to refresh lock heartbeat");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    });

    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move { scheduler.run(shutdown_rx).await }
    });

    restart_recovery(&store, executor.clone()).await;

    let ctx = Arc::new(Context {
        store: store.clone(),
        router: router.clone(),
        executor: executor.clone(),
    });
    let ipc_task = tokio::spawn({
        let socket_path = config.socket_path();
        let shutdown_rx = shutdown_rx.clone();
        async move { hiboss_ipc::serve(&socket_path, ctx, shutdown_rx).await }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "scheduler task panicked");
    }
    match ipc_task.await {
        Ok(Err(e)) => warn!(error = %e, "IPC server exited with error"),
        Err(e) => warn!(error = %e, "IPC task panicked"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = heartbeat_task.await {
        warn!(error = %e, "heartbeat task panicked");
    }

    executor.close_all().await;
    drop(daemon_lock);
    info!("daemon stopped");
    Ok(())
}

/// On startup, after Router/Scheduler are wired, give every agent with
/// already-due pending work a non-blocking nudge. No envelope is lost across
/// a restart because delivery state lives in the Store, never in session
/// memory.
async fn restart_recovery(store: &Store, executor: Arc<Executor>) {
    let agents = match store.list_agents_with_due_envelopes() {
        Ok(agents) => agents,
        Err(e) => {
            warn!(error = %e, "restart recovery: failed to list agents with due work");
            return;
        }
    };
    for agent_name in agents {
        info!(agent = %agent_name, "restart recovery: enqueuing pending work");
        let executor = executor.clone();
        tokio::spawn(async move { executor.check_and_run(&agent_name).await });
    }
}
