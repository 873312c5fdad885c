use anyhow::{Context, Result};
use clap::Parser;
use rattan_bridge::{BackendBridge, BridgeConfig};
use rattan_channel::testing::EchoAdapter;
use rattan_channel::AdapterRegistry;
use rattan_config::{expand_tilde, Config};
use rattan_session::{FileSnapshotStore, SessionManager, SessionManagerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rattan_server::http::build_router;
use rattan_server::inbound::spawn_inbound_pump;
use rattan_server::state::AppState;
use rattan_server::tasks::spawn_periodic_tasks;

#[derive(Parser, Debug)]
#[command(name = "rattan-server")]
#[command(about = "Rattan message gateway")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "RATTAN_CONFIG", default_value = "~/.rattan/config.json")]
    config: String,

    /// Listen host (overrides config)
    #[arg(long, env = "RATTAN_HOST")]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long, env = "RATTAN_PORT")]
    port: Option<u16>,

    /// Log filter (overrides config), e.g. "debug" or "rattan_server=trace"
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Run without supervising the inference backend
    #[arg(long, default_value = "false")]
    no_backend: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));

    if let Err(e) = rattan_config::init_rattan_dirs().await {
        eprintln!("warning: failed to init rattan directories: {}", e);
    }

    let mut config = Config::load(&config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&filter));
    if config.logging.json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(config = %config_path.display(), "starting rattan gateway");

    // Sessions must be loaded before the gateway accepts connections so
    // every connection can bind to the main session.
    let sessions_dir = match &config.sessions.dir {
        Some(dir) => expand_tilde(dir).unwrap_or_else(|| PathBuf::from(dir)),
        None => rattan_config::default_sessions_dir()
            .context("cannot determine the session directory (no home directory)")?,
    };
    let store = Arc::new(FileSnapshotStore::new(sessions_dir));
    let sessions = Arc::new(SessionManager::new(
        SessionManagerConfig {
            history_cap: config.sessions.history_cap,
            history_trim: config.sessions.history_trim,
        },
        store,
    ));
    let loaded = sessions
        .load()
        .await
        .context("failed to load session snapshots")?;
    info!(loaded, "session directory ready");

    let adapters = Arc::new(AdapterRegistry::new());
    for entry in config.channels.iter().filter(|c| c.enabled) {
        match entry.adapter.as_str() {
            "echo" => {
                adapters.register(Arc::new(EchoAdapter::new(&entry.id, &entry.default_domain)));
            }
            other => {
                warn!(channel = %entry.id, adapter = other, "unknown adapter type, skipping");
            }
        }
    }
    let inbound_events = adapters
        .take_receiver()
        .context("adapter event stream already taken")?;
    let connected = adapters.connect_all().await;
    info!(connected, registered = adapters.len(), "channels connected");

    let bridge = Arc::new(BackendBridge::new(bridge_config(&config)));
    if cli.no_backend {
        info!("backend supervision disabled (--no-backend)");
    } else {
        bridge
            .start()
            .await
            .context("failed to start the inference backend")?;
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        sessions,
        adapters,
        Arc::clone(&bridge),
    ));

    let pump = spawn_inbound_pump(Arc::clone(&state), inbound_events);
    let mut tasks = spawn_periodic_tasks(Arc::clone(&state));
    tasks.push(pump);

    let bind_addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("listening on http://{} (ws://{}/ws)", bind_addr, bind_addr);

    let router = build_router(Arc::clone(&state));
    let serve = axum::serve(listener, router).with_graceful_shutdown(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!("failed to listen for shutdown signal: {}", e),
        }
    });

    if let Err(e) = serve.await {
        error!("server error: {}", e);
    }

    info!("shutting down");
    for task in tasks {
        task.abort();
    }
    state.adapters.disconnect_all().await;
    bridge.stop().await;
    info!("goodbye");

    Ok(())
}

fn bridge_config(config: &Config) -> BridgeConfig {
    let expand = |raw: &String| expand_tilde(raw).unwrap_or_else(|| PathBuf::from(raw));
    let working_dir = match &config.bridge.working_dir {
        Some(dir) => expand(dir),
        None => rattan_config::rattan_dir().unwrap_or_else(|| PathBuf::from(".")),
    };
    BridgeConfig {
        host: config.bridge.host.clone(),
        port: config.bridge.port,
        interpreter_candidates: config.bridge.interpreter_candidates.iter().map(expand).collect(),
        entry_candidates: config.bridge.entry_candidates.iter().map(expand).collect(),
        working_dir,
        log_level: config.logging.level.clone(),
        health_poll_interval: Duration::from_millis(config.bridge.health_poll_interval_ms),
        health_poll_attempts: config.bridge.health_poll_attempts,
        heartbeat_interval: Duration::from_secs(config.bridge.heartbeat_interval_secs),
        request_timeout: Duration::from_secs(config.bridge.request_timeout_secs),
        shutdown_timeout: Duration::from_secs(config.bridge.shutdown_timeout_secs),
        model: config.bridge.model.clone(),
    }
}
