//! Event client: one authenticated Socket.IO connection, fan-out to local subscribers.
//!
//! A single spawned task owns the WebSocket. It performs the Engine.IO / Socket.IO handshake,
//! answers heartbeats, forwards queued emits, dispatches inbound events to the registry, and
//! applies the reconnection policy (bounded attempts, fixed delay). Nothing it does is surfaced
//! as an error to callers; failures are logged.

use crate::config::{self, Config};
use crate::realtime::channel::Channel;
use crate::realtime::protocol::{socket_url, Handshake, Packet, ProtocolError};
use crate::realtime::registry::{SubscriberRegistry, Subscription};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why a connection attempt or a live link ended.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("timed out: {0}")]
    Timeout(&'static str),
    #[error("connection closed: {0}")]
    Closed(&'static str),
    #[error("server rejected connect: {0}")]
    Rejected(String),
}

/// Connection target and reconnection policy.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub reconnection: bool,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub connect_timeout: Duration,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::from_config_with_url(&Config::default(), base_url.into())
    }

    /// Options from config, with the base URL resolved through env and fallback.
    pub fn from_config(config: &Config) -> Self {
        Self::from_config_with_url(config, config::resolve_base_url(config))
    }

    fn from_config_with_url(config: &Config, base_url: String) -> Self {
        Self {
            base_url,
            reconnection: config.realtime.reconnection,
            reconnection_attempts: config.realtime.reconnection_attempts,
            reconnection_delay: Duration::from_millis(config.realtime.reconnection_delay_ms),
            connect_timeout: Duration::from_millis(config.realtime.connect_timeout_ms),
        }
    }
}

enum Command {
    Frame(String),
    Close,
}

/// One live connection task and the sender that feeds it.
struct Session {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// State shared between the client handle and its connection task.
struct Shared {
    registry: SubscriberRegistry,
    state: watch::Sender<ConnectionState>,
    /// Bumped by every connect and disconnect; a task whose generation is stale stops
    /// publishing state and dispatching events.
    generation: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        if self.is_current(generation) {
            self.state.send_replace(state);
        }
    }
}

/// Real-time event client. Create one per application root and share it by reference or `Arc`.
pub struct EventClient {
    options: ClientOptions,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

fn lock_session(m: &Mutex<Option<Session>>) -> MutexGuard<'_, Option<Session>> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventClient {
    pub fn new(options: ClientOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            shared: Arc::new(Shared {
                registry: SubscriberRegistry::new(),
                state,
                generation: AtomicU64::new(0),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Open the connection authenticated with `credential`. No-op while a connection is live
    /// (connecting, connected or retrying). Must be called within a Tokio runtime.
    pub fn connect(&self, credential: impl Into<String>) {
        let mut session = lock_session(&self.session);
        if let Some(s) = session.as_ref() {
            if !s.task.is_finished() {
                log::debug!("event client already connected");
                return;
            }
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(e) => {
                log::error!("event client connect needs a tokio runtime: {}", e);
                return;
            }
        };
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(generation, ConnectionState::Connecting);
        let (tx, rx) = mpsc::unbounded_channel();
        log::info!("connecting to event socket at {}", self.options.base_url);
        let task = runtime.spawn(run_connection(
            self.shared.clone(),
            self.options.clone(),
            credential.into(),
            generation,
            rx,
        ));
        *session = Some(Session { commands: tx, task });
    }

    /// Register `callback` for `channel`. Callbacks run in registration order on the
    /// connection task; an error or panic in one does not stop the others.
    pub fn on<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.registry.subscribe(channel, callback)
    }

    /// Send an event upstream. Logged and dropped when not connected.
    pub fn emit<T: Serialize>(&self, event: &str, payload: T) {
        if self.state() != ConnectionState::Connected {
            log::warn!("socket not connected, cannot emit: {}", event);
            return;
        }
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("emit {}: payload not serializable: {}", event, e);
                return;
            }
        };
        let frame = Packet::event(event, payload).encode();
        let session = lock_session(&self.session);
        let sent = session
            .as_ref()
            .map_or(false, |s| s.commands.send(Command::Frame(frame)).is_ok());
        if !sent {
            log::warn!("socket not connected, cannot emit: {}", event);
        }
    }

    /// Close the connection and drop every subscriber, whatever the current state.
    pub fn disconnect(&self) {
        let session = lock_session(&self.session).take();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(s) = session {
            let _ = s.commands.send(Command::Close);
        }
        self.shared.registry.clear();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        log::info!("event client disconnected");
    }

    /// Deliver `payload` to the subscribers of `channel` as if it had arrived on the socket.
    /// Returns how many callbacks ran.
    pub fn dispatch(&self, channel: Channel, payload: &Value) -> usize {
        self.shared.registry.dispatch(channel, payload)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.shared.registry.count(channel)
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        if let Some(s) = lock_session(&self.session).take() {
            let _ = s.commands.send(Command::Close);
        }
    }
}

/// How one connection attempt ended.
enum SessionEnd {
    /// Local disconnect or client dropped.
    Closed,
    /// Server sent a Socket.IO DISCONNECT; not retried.
    ServerDisconnect,
    /// Server refused the CONNECT (bad credential); not retried.
    Rejected(String),
    /// Transport failure; retried per policy.
    Dropped(RealtimeError),
}

async fn run_connection(
    shared: Arc<Shared>,
    options: ClientOptions,
    token: String,
    generation: u64,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let url = socket_url(&options.base_url);
    let mut attempts: u32 = 0;
    loop {
        if !shared.is_current(generation) {
            return;
        }
        shared.set_state(generation, ConnectionState::Connecting);
        let end = run_session(&shared, &options, &url, &token, generation, &mut commands, &mut attempts).await;
        match end {
            SessionEnd::Closed => {
                log::debug!("event socket closed locally");
                return;
            }
            SessionEnd::ServerDisconnect => {
                log::info!("event socket disconnected by server");
                shared.set_state(generation, ConnectionState::Disconnected);
                return;
            }
            SessionEnd::Rejected(msg) => {
                log::error!("event socket connection error: {}", msg);
                shared.set_state(generation, ConnectionState::Disconnected);
                return;
            }
            SessionEnd::Dropped(e) => {
                log::warn!("event socket disconnected: {}", e);
                if !options.reconnection {
                    shared.set_state(generation, ConnectionState::Disconnected);
                    return;
                }
                attempts += 1;
                if attempts > options.reconnection_attempts {
                    log::error!(
                        "event socket giving up after {} reconnection attempts",
                        options.reconnection_attempts
                    );
                    shared.set_state(generation, ConnectionState::Disconnected);
                    return;
                }
                shared.set_state(generation, ConnectionState::Connecting);
                log::info!(
                    "event socket reconnecting in {:?} (attempt {}/{})",
                    options.reconnection_delay,
                    attempts,
                    options.reconnection_attempts
                );
                let delay = tokio::time::sleep(options.reconnection_delay);
                if until_closed(delay, &mut commands).await.is_none() {
                    return;
                }
            }
        }
    }
}

/// Await `fut` unless a close command arrives first (`None`). Emits queued while the link is
/// down are dropped with a warning.
async fn until_closed<F: Future>(
    fut: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            cmd = commands.recv() => match cmd {
                Some(Command::Frame(_)) => {
                    log::warn!("socket not connected, dropping queued emit");
                }
                Some(Command::Close) | None => return None,
            }
        }
    }
}

async fn run_session(
    shared: &Shared,
    options: &ClientOptions,
    url: &str,
    token: &str,
    generation: u64,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    attempts: &mut u32,
) -> SessionEnd {
    let connect = tokio::time::timeout(options.connect_timeout, tokio_tungstenite::connect_async(url));
    let ws = match until_closed(connect, commands).await {
        None => return SessionEnd::Closed,
        Some(Err(_)) => return SessionEnd::Dropped(RealtimeError::Timeout("websocket connect")),
        Some(Ok(Err(e))) => return SessionEnd::Dropped(e.into()),
        Some(Ok(Ok((ws, _)))) => ws,
    };
    let (mut sink, mut stream) = ws.split();

    // Engine.IO open, then Socket.IO CONNECT with the credential, then wait for the ack.
    let handshake_deadline = Instant::now() + options.connect_timeout;
    let mut handshake: Option<Handshake> = None;
    loop {
        let next = tokio::time::timeout_at(handshake_deadline, stream.next());
        let msg = match until_closed(next, commands).await {
            None => {
                let _ = sink.close().await;
                return SessionEnd::Closed;
            }
            Some(Err(_)) => return SessionEnd::Dropped(RealtimeError::Timeout("socket.io handshake")),
            Some(Ok(None)) => return SessionEnd::Dropped(RealtimeError::Closed("during handshake")),
            Some(Ok(Some(Err(e)))) => return SessionEnd::Dropped(e.into()),
            Some(Ok(Some(Ok(m)))) => m,
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => return SessionEnd::Dropped(RealtimeError::Closed("during handshake")),
            _ => continue,
        };
        match Packet::decode(&text) {
            Ok(Packet::Open(h)) => {
                log::debug!("engine.io open sid={} pingInterval={}ms", h.sid, h.ping_interval);
                handshake = Some(h);
                let connect = Packet::connect_with_token(token).encode();
                if let Err(e) = sink.send(Message::Text(connect)).await {
                    return SessionEnd::Dropped(e.into());
                }
            }
            Ok(Packet::Ping) => {
                if let Err(e) = sink.send(Message::Text(Packet::Pong.encode())).await {
                    return SessionEnd::Dropped(e.into());
                }
            }
            Ok(Packet::Connect { data, .. }) if handshake.is_some() => {
                let sid = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                log::info!("event socket connected (sid {})", sid);
                break;
            }
            Ok(Packet::ConnectError { message, .. }) => return SessionEnd::Rejected(message),
            Ok(Packet::Close) => return SessionEnd::Dropped(RealtimeError::Closed("during handshake")),
            Ok(other) => log::debug!("ignoring packet during handshake: {:?}", other),
            Err(e) => return SessionEnd::Dropped(e.into()),
        }
    }

    let Some(handshake) = handshake else {
        return SessionEnd::Dropped(RealtimeError::Closed("no engine.io open packet"));
    };
    *attempts = 0;
    shared.set_state(generation, ConnectionState::Connected);

    let idle = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut deadline = Instant::now() + idle;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return SessionEnd::Dropped(RealtimeError::Timeout("ping timeout"));
            }
            cmd = commands.recv() => match cmd {
                Some(Command::Frame(frame)) => {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        return SessionEnd::Dropped(e.into());
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Text(Packet::disconnect().encode())).await;
                    let _ = sink.close().await;
                    return SessionEnd::Closed;
                }
            },
            msg = stream.next() => {
                deadline = Instant::now() + idle;
                let msg = match msg {
                    None => return SessionEnd::Dropped(RealtimeError::Closed("transport close")),
                    Some(Err(e)) => return SessionEnd::Dropped(e.into()),
                    Some(Ok(m)) => m,
                };
                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => {
                        return SessionEnd::Dropped(RealtimeError::Closed("transport close"));
                    }
                    _ => continue,
                };
                match Packet::decode(&text) {
                    Ok(Packet::Ping) => {
                        if let Err(e) = sink.send(Message::Text(Packet::Pong.encode())).await {
                            return SessionEnd::Dropped(e.into());
                        }
                    }
                    Ok(Packet::Event { namespace, name, payload, .. }) => {
                        if namespace != "/" {
                            log::debug!("ignoring event {} on namespace {}", name, namespace);
                            continue;
                        }
                        match name.parse::<Channel>() {
                            Ok(channel) => {
                                if !shared.is_current(generation) {
                                    continue;
                                }
                                log::debug!("received {}: {}", channel, payload);
                                shared.registry.dispatch(channel, &payload);
                            }
                            Err(_) => log::debug!("ignoring unknown event {}", name),
                        }
                    }
                    Ok(Packet::Disconnect { .. }) => return SessionEnd::ServerDisconnect,
                    Ok(Packet::Close) => {
                        return SessionEnd::Dropped(RealtimeError::Closed("engine.io close"));
                    }
                    Ok(Packet::ConnectError { message, .. }) => return SessionEnd::Rejected(message),
                    Ok(_) => {}
                    Err(e) => log::debug!("undecodable frame {:?}: {}", text, e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn client() -> EventClient {
        EventClient::new(ClientOptions::new("http://127.0.0.1:9"))
    }

    #[test]
    fn options_follow_config() {
        let mut config = Config::default();
        config.realtime.reconnection_attempts = 2;
        config.realtime.reconnection_delay_ms = 250;
        config.api.base_url = Some("http://10.0.0.2:5000".to_string());
        let opts = ClientOptions::from_config_with_url(&config, "http://10.0.0.2:5000".to_string());
        assert_eq!(opts.reconnection_attempts, 2);
        assert_eq!(opts.reconnection_delay, Duration::from_millis(250));
        assert!(opts.reconnection);
    }

    #[test]
    fn detection_scenario_then_unsubscribe() {
        let client = client();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = calls.clone();
        let sub = client.on(Channel::Detection, move |v: &Value| {
            c.lock().unwrap().push(v.clone());
            Ok(())
        });

        let payload = json!({"device": "D1", "lat": 1.0, "lon": 2.0});
        assert_eq!(client.dispatch(Channel::Detection, &payload), 1);
        assert_eq!(*calls.lock().unwrap(), vec![payload.clone()]);

        sub.unsubscribe();
        assert_eq!(client.dispatch(Channel::Detection, &payload), 0);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn disconnect_clears_subscribers_from_any_state() {
        let client = client();
        let hits = Arc::new(AtomicUsize::new(0));
        for channel in Channel::ALL {
            let h = hits.clone();
            let _ = client.on(channel, move |_: &Value| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        for channel in Channel::ALL {
            assert_eq!(client.dispatch(channel, &json!({})), 0);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_while_disconnected_is_dropped() {
        let client = client();
        client.emit("location_update", json!({"lat": 1.0}));
        assert!(!client.is_connected());
    }

    #[test]
    fn connect_without_runtime_is_logged_not_thrown() {
        let client = client();
        client.connect("token");
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
