//! Per-server connection lifecycle management.
//!
//! Each registered server runs the state machine
//! `Disconnected → Connecting → Connected`, with `Connecting → Retrying →
//! Connecting` on transient failures up to `maxRetries`. Exhausting the retry
//! budget lands in a terminal `Failed` state that requires an explicit
//! [`ConnectionManager::reset`]. While `Connected`, an optional heartbeat
//! probes the endpoint and demotes the server to `Disconnected` on failure.
//!
//! Observable transitions emit exactly one [`ConnectionEvent`] on a broadcast
//! channel, with per-server non-decreasing timestamps. Concurrent `connect`
//! calls to one server coalesce into a single in-flight attempt.

use crate::config::ConnectionSettings;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection state for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    Disconnected,
    Connecting,
    Retrying,
    Connected,
    Failed,
}

/// Point-in-time connectivity report for one server.
///
/// Mutated only by the manager in response to connect/disconnect/retry/error
/// events; read by the status surface and dashboard consumers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEventKind {
    Connected,
    Disconnected,
    Error,
    Retry,
}

/// An immutable connectivity fact emitted by the manager.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEvent {
    pub kind: ConnectionEventKind,
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dialing seam. Production probes over HTTP; tests inject scripts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Probe the endpoint once; returns the measured latency on success.
    /// The caller applies the configured timeout around this.
    async fn probe(&self, endpoint: &str) -> Result<Duration>;
}

/// Probes an endpoint with a GET request. Any HTTP response (any status)
/// proves reachability; only transport-level failures count as errors.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, endpoint: &str) -> Result<Duration> {
        let started = Instant::now();
        self.client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| CoreError::Connection(e.without_url().to_string()))?;
        Ok(started.elapsed())
    }
}

struct ServerEntry {
    id: String,
    endpoint: String,
    settings: ConnectionSettings,
    inner: Mutex<ServerInner>,
}

struct ServerInner {
    state: ConnState,
    status: ConnectionStatus,
    last_event_at: DateTime<Utc>,
    attempt: Option<AttemptHandle>,
    heartbeat: Option<tokio::task::JoinHandle<()>>,
}

struct AttemptHandle {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

impl ServerInner {
    fn new() -> Self {
        Self {
            state: ConnState::Disconnected,
            status: ConnectionStatus::default(),
            last_event_at: Utc::now(),
            attempt: None,
            heartbeat: None,
        }
    }
}

/// Owns the per-server status map and the event channel.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    servers: RwLock<HashMap<String, Arc<ServerEntry>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            servers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register a server. All servers start `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns an error on a duplicate server id.
    pub fn register(
        &self,
        server_id: impl Into<String>,
        endpoint: impl Into<String>,
        settings: ConnectionSettings,
    ) -> Result<()> {
        let server_id = server_id.into();
        let mut servers = self.servers.write();
        if servers.contains_key(&server_id) {
            return Err(CoreError::Config(format!(
                "Duplicate server id '{server_id}'"
            )));
        }
        servers.insert(
            server_id.clone(),
            Arc::new(ServerEntry {
                id: server_id,
                endpoint: endpoint.into(),
                settings,
                inner: Mutex::new(ServerInner::new()),
            }),
        );
        Ok(())
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn server_ids(&self) -> Vec<String> {
        self.servers.read().keys().cloned().collect()
    }

    /// # Errors
    ///
    /// Returns an error if the server id is unknown.
    pub fn status(&self, server_id: &str) -> Result<ConnectionStatus> {
        Ok(self.entry(server_id)?.inner.lock().status.clone())
    }

    #[must_use]
    pub fn statuses(&self) -> HashMap<String, ConnectionStatus> {
        self.servers
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.inner.lock().status.clone()))
            .collect()
    }

    /// # Errors
    ///
    /// Returns an error if the server id is unknown.
    pub fn state(&self, server_id: &str) -> Result<ConnState> {
        Ok(self.entry(server_id)?.inner.lock().state)
    }

    /// `(connected, not-connected)` counts over the registered servers.
    #[must_use]
    pub fn connection_counts(&self) -> (usize, usize) {
        let servers = self.servers.read();
        let active = servers
            .values()
            .filter(|e| e.inner.lock().state == ConnState::Connected)
            .count();
        (active, servers.len() - active)
    }

    /// Drive the server towards `Connected`, retrying per its settings.
    ///
    /// Concurrent calls against one server share a single in-flight attempt.
    /// Resolves once the attempt settles.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unknown, already `Failed`, the
    /// attempt exhausts its retry budget, or a `disconnect` cancels it.
    pub async fn connect(&self, server_id: &str) -> Result<()> {
        let entry = self.entry(server_id)?;

        let done = {
            let mut inner = entry.inner.lock();
            match inner.state {
                ConnState::Connected => return Ok(()),
                ConnState::Failed => {
                    return Err(CoreError::Connection(format!(
                        "server '{server_id}' is in failed state; reset required"
                    )));
                }
                ConnState::Connecting | ConnState::Retrying => inner
                    .attempt
                    .as_ref()
                    .map(|a| a.done.clone())
                    .ok_or_else(|| {
                        CoreError::Runtime(format!(
                            "server '{server_id}' is connecting with no in-flight attempt"
                        ))
                    })?,
                ConnState::Disconnected => {
                    let cancel = CancellationToken::new();
                    let (done_tx, done_rx) = watch::channel(false);
                    inner.state = ConnState::Connecting;
                    inner.status.error = None;
                    inner.attempt = Some(AttemptHandle {
                        cancel: cancel.clone(),
                        done: done_rx.clone(),
                    });
                    tokio::spawn(
                        AttemptTask {
                            entry: entry.clone(),
                            transport: self.transport.clone(),
                            events: self.events.clone(),
                            cancel,
                            done: done_tx,
                        }
                        .run(),
                    );
                    done_rx
                }
            }
        };

        // Await the attempt outside the lock.
        let mut done = done;
        let _ = done.wait_for(|settled| *settled).await;

        let inner = entry.inner.lock();
        match inner.state {
            ConnState::Connected => Ok(()),
            ConnState::Failed => Err(CoreError::Connection(format!(
                "server '{server_id}' failed after {} attempts: {}",
                entry.settings.max_retries,
                inner.status.error.as_deref().unwrap_or("unknown error")
            ))),
            _ => Err(CoreError::Connection(format!(
                "connect to '{server_id}' cancelled"
            ))),
        }
    }

    /// Disconnect a server, cancelling any in-flight attempt.
    ///
    /// A cancelled attempt emits `disconnected` immediately and no further
    /// retry events. A `Failed` server stays `Failed` (use [`Self::reset`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the server id is unknown.
    pub fn disconnect(&self, server_id: &str) -> Result<()> {
        let entry = self.entry(server_id)?;
        let mut inner = entry.inner.lock();
        match inner.state {
            ConnState::Connecting | ConnState::Retrying => {
                if let Some(attempt) = inner.attempt.take() {
                    attempt.cancel.cancel();
                }
                inner.state = ConnState::Disconnected;
                inner.status.connected = false;
                emit_event(
                    &self.events,
                    &entry.id,
                    &mut inner,
                    ConnectionEventKind::Disconnected,
                    None,
                    None,
                );
            }
            ConnState::Connected => {
                if let Some(heartbeat) = inner.heartbeat.take() {
                    heartbeat.abort();
                }
                inner.state = ConnState::Disconnected;
                inner.status.connected = false;
                emit_event(
                    &self.events,
                    &entry.id,
                    &mut inner,
                    ConnectionEventKind::Disconnected,
                    None,
                    None,
                );
            }
            ConnState::Disconnected | ConnState::Failed => {}
        }
        Ok(())
    }

    /// Externally reset a `Failed` server back to `Disconnected`.
    ///
    /// No-op in any other state; emits no event (an administrative act, not
    /// a connectivity fact).
    ///
    /// # Errors
    ///
    /// Returns an error if the server id is unknown.
    pub fn reset(&self, server_id: &str) -> Result<()> {
        let entry = self.entry(server_id)?;
        let mut inner = entry.inner.lock();
        if inner.state == ConnState::Failed {
            inner.state = ConnState::Disconnected;
            inner.status.error = None;
        }
        Ok(())
    }

    /// Disconnect every registered server.
    pub fn shutdown(&self) {
        for id in self.server_ids() {
            let _ = self.disconnect(&id);
        }
    }

    fn entry(&self, server_id: &str) -> Result<Arc<ServerEntry>> {
        self.servers
            .read()
            .get(server_id)
            .cloned()
            .ok_or_else(|| CoreError::Runtime(format!("Unknown server: {server_id}")))
    }
}

/// One connect run: up to `max_retries` probes with fixed-interval backoff.
struct AttemptTask {
    entry: Arc<ServerEntry>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<ConnectionEvent>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

impl AttemptTask {
    async fn run(self) {
        let max_attempts = self.entry.settings.max_retries.max(1);

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                break;
            }

            let probe = tokio::time::timeout(
                self.entry.settings.timeout(),
                self.transport.probe(&self.entry.endpoint),
            );
            let outcome = tokio::select! {
                () = self.cancel.cancelled() => break,
                res = probe => match res {
                    Ok(Ok(latency)) => Ok(latency),
                    Ok(Err(e)) => Err(e.to_string()),
                    // Timeout is indistinguishable from a connection error
                    // for retry accounting.
                    Err(_) => Err(format!(
                        "connect timed out after {}ms",
                        self.entry.settings.timeout_ms
                    )),
                },
            };

            match outcome {
                Ok(latency) => {
                    self.on_success(latency);
                    let _ = self.done.send(true);
                    return;
                }
                Err(message) => {
                    let terminal = attempt == max_attempts;
                    self.on_failure(attempt, &message, terminal);
                    if terminal {
                        let _ = self.done.send(true);
                        return;
                    }
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(self.entry.settings.retry_interval()) => {}
                    }
                    self.on_reattempt();
                }
            }
        }

        // Cancelled: disconnect() already performed the transition and event.
        let _ = self.done.send(true);
    }

    fn on_success(&self, latency: Duration) {
        let mut inner = self.entry.inner.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        inner.state = ConnState::Connected;
        inner.status.connected = true;
        inner.status.last_connected = Some(Utc::now());
        inner.status.latency_ms = Some(latency.as_secs_f64() * 1000.0);
        inner.status.attempts = Some(0);
        inner.status.error = None;
        inner.attempt = None;
        tracing::info!(server = %self.entry.id, latency_ms = latency.as_millis() as u64, "connected");
        emit_event(
            &self.events,
            &self.entry.id,
            &mut inner,
            ConnectionEventKind::Connected,
            None,
            None,
        );
        if let Some(interval) = self.entry.settings.heartbeat_interval() {
            inner.heartbeat = Some(spawn_heartbeat(
                self.entry.clone(),
                self.transport.clone(),
                self.events.clone(),
                interval,
            ));
        }
    }

    fn on_failure(&self, attempt: u32, message: &str, terminal: bool) {
        let mut inner = self.entry.inner.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        inner.status.attempts = Some(inner.status.attempts.unwrap_or(0) + 1);
        inner.status.error = Some(message.to_string());
        tracing::warn!(server = %self.entry.id, attempt, error = %message, "connect attempt failed");
        emit_event(
            &self.events,
            &self.entry.id,
            &mut inner,
            ConnectionEventKind::Retry,
            Some(attempt),
            Some(message.to_string()),
        );
        if terminal {
            inner.state = ConnState::Failed;
            inner.attempt = None;
            emit_event(
                &self.events,
                &self.entry.id,
                &mut inner,
                ConnectionEventKind::Error,
                Some(attempt),
                Some(message.to_string()),
            );
        } else {
            inner.state = ConnState::Retrying;
        }
    }

    fn on_reattempt(&self) {
        let mut inner = self.entry.inner.lock();
        if inner.state == ConnState::Retrying {
            inner.state = ConnState::Connecting;
        }
    }
}

fn spawn_heartbeat(
    entry: Arc<ServerEntry>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<ConnectionEvent>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let probe = tokio::time::timeout(entry.settings.timeout(), transport.probe(&entry.endpoint));
            match probe.await {
                Ok(Ok(latency)) => {
                    let mut inner = entry.inner.lock();
                    if inner.state != ConnState::Connected {
                        break;
                    }
                    inner.status.latency_ms = Some(latency.as_secs_f64() * 1000.0);
                }
                Ok(Err(e)) => {
                    heartbeat_lost(&entry, &events, e.to_string());
                    break;
                }
                Err(_) => {
                    heartbeat_lost(
                        &entry,
                        &events,
                        format!("heartbeat timed out after {}ms", entry.settings.timeout_ms),
                    );
                    break;
                }
            }
        }
    })
}

fn heartbeat_lost(
    entry: &Arc<ServerEntry>,
    events: &broadcast::Sender<ConnectionEvent>,
    message: String,
) {
    let mut inner = entry.inner.lock();
    if inner.state != ConnState::Connected {
        return;
    }
    inner.state = ConnState::Disconnected;
    inner.status.connected = false;
    inner.status.error = Some(message.clone());
    inner.heartbeat = None;
    tracing::warn!(server = %entry.id, error = %message, "heartbeat failed; marking disconnected");
    emit_event(
        events,
        &entry.id,
        &mut inner,
        ConnectionEventKind::Disconnected,
        None,
        Some(message),
    );
}

/// Emit under the server lock so timestamps are non-decreasing per server.
fn emit_event(
    events: &broadcast::Sender<ConnectionEvent>,
    server_id: &str,
    inner: &mut ServerInner,
    kind: ConnectionEventKind,
    attempt: Option<u32>,
    error: Option<String>,
) {
    let now = Utc::now();
    let timestamp = if now < inner.last_event_at {
        inner.last_event_at
    } else {
        now
    };
    inner.last_event_at = timestamp;
    let _ = events.send(ConnectionEvent {
        kind,
        server_id: server_id.to_string(),
        timestamp,
        attempt,
        error,
    });
}
