//! Backend process supervision and proxying.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rattan_core::Message as ChatMessage;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;

/// Supervision knobs. Everything the child process needs is passed
/// explicitly - port, working directory, log level - never inherited
/// implicitly.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Ordered interpreter candidates; the first existing path wins
    pub interpreter_candidates: Vec<PathBuf>,
    /// Ordered entry script candidates; the first existing path wins
    pub entry_candidates: Vec<PathBuf>,
    pub working_dir: PathBuf,
    pub log_level: String,
    pub health_poll_interval: Duration,
    pub health_poll_attempts: u32,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Model name sent on chat completions
    pub model: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18791,
            interpreter_candidates: vec![
                PathBuf::from("/usr/local/bin/python3"),
                PathBuf::from("/usr/bin/python3"),
            ],
            entry_candidates: vec![PathBuf::from("./backend/server.py")],
            working_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            health_poll_interval: Duration::from_millis(500),
            health_poll_attempts: 30,
            heartbeat_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            model: "rattan-local".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn duplex_url(&self) -> String {
        format!("ws://{}:{}/ws", self.host, self.port)
    }
}

/// Supervision state machine. "Ready" has exactly one definition:
/// process live, HTTP health passed, duplex open - see
/// [`BackendBridge::is_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    NotStarted,
    Starting,
    HttpReady,
    FullyReady,
    Stopped,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::NotStarted => write!(f, "not_started"),
            BridgeState::Starting => write!(f, "starting"),
            BridgeState::HttpReady => write!(f, "http_ready"),
            BridgeState::FullyReady => write!(f, "fully_ready"),
            BridgeState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Diagnostic snapshot for `backend.status` and `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub base_url: String,
    pub process_alive: bool,
    pub http_ready: bool,
    pub duplex_open: bool,
    pub outstanding_pings: usize,
}

struct Shared {
    state: RwLock<BridgeState>,
    process_alive: AtomicBool,
    http_ready: AtomicBool,
    duplex_open: AtomicBool,
    ping_seq: AtomicU64,
    /// Pings sent but not yet answered, keyed by sequence number.
    /// Observable for diagnostics; an unanswered ping is not fatal.
    pending_pings: DashMap<u64, DateTime<Utc>>,
    /// Non-heartbeat duplex messages, forwarded unmodified
    listeners: broadcast::Sender<Value>,
}

impl Shared {
    fn set_state(&self, state: BridgeState) {
        *self.state.write() = state;
    }

    fn on_process_exit(&self) {
        self.process_alive.store(false, Ordering::SeqCst);
        self.http_ready.store(false, Ordering::SeqCst);
        self.duplex_open.store(false, Ordering::SeqCst);
        self.pending_pings.clear();
        self.set_state(BridgeState::NotStarted);
    }
}

/// Supervisor for the external inference backend.
pub struct BackendBridge {
    config: BridgeConfig,
    http: reqwest::Client,
    shared: Arc<Shared>,
    child: Arc<Mutex<Option<Child>>>,
    duplex_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BackendBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (listeners, _) = broadcast::channel(64);
        Self {
            config,
            http: reqwest::Client::new(),
            shared: Arc::new(Shared {
                state: RwLock::new(BridgeState::NotStarted),
                process_alive: AtomicBool::new(false),
                http_ready: AtomicBool::new(false),
                duplex_open: AtomicBool::new(false),
                ping_seq: AtomicU64::new(0),
                pending_pings: DashMap::new(),
                listeners,
            }),
            child: Arc::new(Mutex::new(None)),
            duplex_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        *self.shared.state.read()
    }

    /// True only when all three hold: the process handle is live, HTTP
    /// health passed at least once, and the duplex socket is open.
    pub fn is_ready(&self) -> bool {
        self.shared.process_alive.load(Ordering::SeqCst)
            && self.shared.http_ready.load(Ordering::SeqCst)
            && self.shared.duplex_open.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            state: self.state(),
            base_url: self.config.base_url(),
            process_alive: self.shared.process_alive.load(Ordering::SeqCst),
            http_ready: self.shared.http_ready.load(Ordering::SeqCst),
            duplex_open: self.shared.duplex_open.load(Ordering::SeqCst),
            outstanding_pings: self.shared.pending_pings.len(),
        }
    }

    /// Subscribe to non-heartbeat duplex messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.shared.listeners.subscribe()
    }

    /// Spawn the backend, wait for HTTP health, open the duplex socket and
    /// start the heartbeat. Fails fast when no executable candidate exists
    /// or the health poll budget is exhausted.
    pub async fn start(&self) -> Result<(), BridgeError> {
        self.shared.set_state(BridgeState::Starting);

        let Some(interpreter) = first_existing(&self.config.interpreter_candidates) else {
            self.shared.set_state(BridgeState::NotStarted);
            return Err(BridgeError::InterpreterNotFound(join_paths(
                &self.config.interpreter_candidates,
            )));
        };
        let Some(entry) = first_existing(&self.config.entry_candidates) else {
            self.shared.set_state(BridgeState::NotStarted);
            return Err(BridgeError::EntryNotFound(join_paths(
                &self.config.entry_candidates,
            )));
        };

        tokio::fs::create_dir_all(&self.config.working_dir).await?;

        info!(
            interpreter = %interpreter.display(),
            entry = %entry.display(),
            port = self.config.port,
            "spawning backend"
        );

        let mut child = Command::new(&interpreter)
            .arg(&entry)
            .env("RATTAN_BACKEND_PORT", self.config.port.to_string())
            .env("RATTAN_PROJECT_ROOT", &self.config.working_dir)
            .env("RATTAN_LOG_LEVEL", &self.config.log_level)
            .current_dir(&self.config.working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Spawn(e.to_string()))?;

        // Child output is captured for logging only; control flow never
        // parses it.
        let mut tasks = self.tasks.lock().await;
        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "backend", "{}", line);
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "backend", "{}", line);
                }
            }));
        }
        drop(tasks);

        self.shared.process_alive.store(true, Ordering::SeqCst);
        *self.child.lock().await = Some(child);
        self.spawn_exit_monitor().await;

        if let Err(e) = self.poll_health().await {
            self.abort_start().await;
            return Err(e);
        }
        self.shared.http_ready.store(true, Ordering::SeqCst);
        self.shared.set_state(BridgeState::HttpReady);
        info!("backend HTTP health confirmed");

        if let Err(e) = self.open_duplex().await {
            self.abort_start().await;
            return Err(e);
        }
        self.shared.duplex_open.store(true, Ordering::SeqCst);
        self.shared.set_state(BridgeState::FullyReady);
        info!("backend duplex socket open, bridge fully ready");

        Ok(())
    }

    /// Generic request proxy. Returns `Unavailable` immediately when the
    /// bridge is not fully ready - the call is never attempted.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BridgeError> {
        if !self.is_ready() {
            return Err(BridgeError::Unavailable);
        }

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| BridgeError::InvalidRequest(format!("bad method: {}", method)))?;
        let url = format!(
            "{}/{}",
            self.config.base_url(),
            path.trim_start_matches('/')
        );

        let mut builder = self
            .http
            .request(method, &url)
            .timeout(self.config.request_timeout);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BridgeError::Backend {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// POST `/chat/completions` and extract the completion content.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, BridgeError> {
        let body = json!({
            "model": self.config.model,
            "messages": messages
                .iter()
                .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
                .collect::<Vec<_>>(),
        });

        let value = self.request("POST", "/chat/completions", Some(body)).await?;
        value
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Protocol("completion response missing content".into()))
    }

    /// Graceful shutdown: a shutdown note over the duplex socket, a bounded
    /// wait for the child to exit, then a force-kill. Never blocks the
    /// caller indefinitely.
    pub async fn stop(&self) {
        self.shared.set_state(BridgeState::Stopped);
        self.shared.http_ready.store(false, Ordering::SeqCst);
        self.shared.duplex_open.store(false, Ordering::SeqCst);

        if let Some(tx) = self.duplex_tx.lock().await.take() {
            let _ = tx.send(
                json!({"type": "shutdown", "timestamp": Utc::now().timestamp_millis()})
                    .to_string(),
            );
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match timeout(self.config.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => info!("backend exited: {}", status),
                Ok(Err(e)) => warn!("backend wait failed: {}", e),
                Err(_) => {
                    warn!(
                        "backend did not exit within {:?}, force-killing",
                        self.config.shutdown_timeout
                    );
                    if let Err(e) = child.kill().await {
                        warn!("backend kill failed: {}", e);
                    }
                }
            }
        }
        self.shared.process_alive.store(false, Ordering::SeqCst);
        self.shared.pending_pings.clear();

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    /// Outstanding heartbeat pings, for diagnostics.
    pub fn outstanding_pings(&self) -> usize {
        self.shared.pending_pings.len()
    }

    async fn abort_start(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        self.shared.on_process_exit();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    async fn spawn_exit_monitor(&self) {
        let shared = Arc::clone(&self.shared);
        // The monitor cannot own the child (stop() needs it), so it polls
        // try_wait under the shared lock.
        let child_slot = Arc::clone(&self.child);
        let handle = tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(500));
            loop {
                tick.tick().await;
                let mut guard = child_slot.lock().await;
                match guard.as_mut() {
                    Some(child) => match child.try_wait() {
                        Ok(Some(status)) => {
                            error!("backend process exited unexpectedly: {}", status);
                            *guard = None;
                            drop(guard);
                            shared.on_process_exit();
                            break;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("backend wait probe failed: {}", e);
                        }
                    },
                    // stop() or abort_start() took the child
                    None => break,
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    async fn poll_health(&self) -> Result<(), BridgeError> {
        let url = format!("{}/health", self.config.base_url());
        for attempt in 1..=self.config.health_poll_attempts {
            if !self.shared.process_alive.load(Ordering::SeqCst) {
                return Err(BridgeError::Spawn(
                    "backend exited during startup".to_string(),
                ));
            }
            let probe = self
                .http
                .get(&url)
                .timeout(Duration::from_secs(2))
                .send()
                .await;
            match probe {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    debug!(attempt, status = %response.status(), "health probe not ready")
                }
                Err(e) => debug!(attempt, "health probe failed: {}", e),
            }
            tokio::time::sleep(self.config.health_poll_interval).await;
        }
        Err(BridgeError::HealthTimeout {
            attempts: self.config.health_poll_attempts,
        })
    }

    async fn open_duplex(&self) -> Result<(), BridgeError> {
        let (stream, _) = connect_async(self.config.duplex_url()).await?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *self.duplex_tx.lock().await = Some(out_tx.clone());

        let mut tasks = self.tasks.lock().await;

        // Writer: drains the outbound queue into the socket.
        tasks.push(tokio::spawn(async move {
            while let Some(raw) = out_rx.recv().await {
                if sink.send(WsMessage::Text(raw)).await.is_err() {
                    break;
                }
            }
        }));

        // Reader: matches pongs against pending pings, forwards everything
        // else unmodified to interested listeners.
        let shared = Arc::clone(&self.shared);
        tasks.push(tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(WsMessage::Text(raw)) => {
                        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
                            warn!("unparseable duplex message: {}", raw);
                            continue;
                        };
                        match value.get("type").and_then(Value::as_str) {
                            Some("pong") => {
                                if let Some(seq) = value.get("seq").and_then(Value::as_u64) {
                                    shared.pending_pings.remove(&seq);
                                }
                            }
                            Some(_) => {
                                let _ = shared.listeners.send(value);
                            }
                            None => warn!("duplex message without type: {}", raw),
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            shared.duplex_open.store(false, Ordering::SeqCst);
            if *shared.state.read() == BridgeState::FullyReady {
                shared.set_state(BridgeState::HttpReady);
                warn!("backend duplex socket closed");
            }
        }));

        // Heartbeat: ping{seq} on a fixed interval. An unanswered ping is
        // observable, not fatal; no reconnect happens at this layer.
        let shared = Arc::clone(&self.shared);
        let heartbeat_interval = self.config.heartbeat_interval;
        tasks.push(tokio::spawn(async move {
            let mut tick = interval(heartbeat_interval);
            tick.tick().await; // immediate first tick
            loop {
                tick.tick().await;
                if !shared.duplex_open.load(Ordering::SeqCst) {
                    break;
                }
                let outstanding = shared.pending_pings.len();
                if outstanding > 0 {
                    warn!(outstanding, "backend heartbeat pings outstanding");
                }
                let seq = shared.ping_seq.fetch_add(1, Ordering::SeqCst);
                shared.pending_pings.insert(seq, Utc::now());
                let ping = json!({
                    "type": "ping",
                    "seq": seq,
                    "timestamp": Utc::now().timestamp_millis(),
                });
                if out_tx.send(ping.to_string()).is_err() {
                    break;
                }
            }
        }));

        Ok(())
    }
}

fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.exists()).cloned()
}

fn join_paths(candidates: &[PathBuf]) -> String {
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
