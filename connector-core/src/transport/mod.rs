//! C4 — PostClient: persistent authenticated duplex transport.
//!
//! Generalizes the teacher's `connection_fsm.rs` typestate connection
//! lifecycle (`ConnectionDisconnected`/`Connected`/`Reconnecting`/`Failed`,
//! each a distinct owned type moved between states) down to a plain
//! `ConnectionState` enum behind a `parking_lot::Mutex`: this machine must
//! be read from the writer, reader, and heartbeat threads simultaneously,
//! and a heartbeat thread can't "own" a typestate value that a reader
//! thread also needs to inspect. §4.3's own phrase, "single-threaded
//! cooperative within, parallel with callers", is why the socket itself is
//! a single `Arc<Mutex<WebSocket<..>>>` shared by short critical sections
//! rather than split read/write halves: each thread's use of the socket is
//! a brief, non-blocking-ish operation (one frame write, one bounded-time
//! read attempt) rather than a long-held lock.

mod frames;
mod pending;

pub use frames::{InboundFrame, OutboundFrame, PostRequestFrame, PostResponseData, SubscribeFrame};
pub use pending::PendingPost;

use crate::error::ConnectorError;
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use tungstenite::{Message, WebSocket};

type Stream = tungstenite::stream::MaybeTlsStream<TcpStream>;

/// §4.3 state machine. `DISCONNECTED -> HANDSHAKING -> {CONNECTED,
/// DISCONNECTED}`, `CONNECTED -> DISCONNECTED` on I/O error or stale
/// heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Connected,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Invoked on the reader thread for every inbound frame that is not a post
/// response (channel pushes, pongs). This is C4's "weak/backward reference"
/// into C6 (§3 Ownership): `PostClient` holds it as a plain trait object,
/// not an `Arc` back-pointer into the façade.
pub trait FrameListener: Send + Sync {
    fn on_frame(&self, frame: InboundFrame);
}

pub struct PostClientConfig {
    pub url: String,
    pub post_timeout: Duration,
    pub heartbeat_ping_after: Duration,
    pub heartbeat_stale_after: Duration,
    pub handshake_timeout: Duration,
}

struct Shared {
    socket: Mutex<Option<WebSocket<Stream>>>,
    state: Mutex<ConnectionState>,
    outbound_tx: Sender<OutboundFrame>,
    outbound_rx: Receiver<OutboundFrame>,
    correlation: DashMap<u64, PendingPost>,
    next_request_id: AtomicU64,
    last_msg_ms: AtomicU64,
    last_ping_sent_ms: AtomicU64,
    stale_events: AtomicU64,
    stop: AtomicBool,
    listener: Arc<dyn FrameListener>,
}

/// Persistent duplex transport. One instance per connector; C7 tears down
/// and reconstructs it on reconnect (§4.3 "Reconnection: policy lives in
/// C7 — C4 does not auto-reconnect").
pub struct PostClient {
    shared: Arc<Shared>,
    config: PostClientConfig,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PostClient {
    pub fn new(config: PostClientConfig, listener: Arc<dyn FrameListener>) -> Self {
        let (outbound_tx, outbound_rx) = channel::unbounded();
        let shared = Arc::new(Shared {
            socket: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            outbound_tx,
            outbound_rx,
            correlation: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            last_msg_ms: AtomicU64::new(now_ms()),
            last_ping_sent_ms: AtomicU64::new(0),
            stale_events: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            listener,
        });
        Self {
            shared,
            config,
            writer_handle: Mutex::new(None),
            reader_handle: Mutex::new(None),
            heartbeat_handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Cumulative count of heartbeat-detected staleness events, for C7's
    /// reconnect watcher to mirror into `ConnectorMetrics::heartbeat_stale_total`
    /// as a delta. C4 stays metrics-agnostic; this is a plain counter.
    pub fn stale_event_count(&self) -> u64 {
        self.shared.stale_events.load(Ordering::Relaxed)
    }

    /// Resolves host, opens TCP, establishes TLS (SNI), performs the
    /// websocket upgrade. Run with a hard deadline (`handshake_timeout`,
    /// default 8s); a timed-out handshake cancels the underlying socket.
    pub fn connect(&self) -> Result<(), ConnectorError> {
        *self.shared.state.lock() = ConnectionState::Handshaking;

        let deadline_err = || ConnectorError::PostTimeout(self.config.handshake_timeout.as_millis() as u64);
        let start = Instant::now();

        let (socket, _response) = tungstenite::connect(&self.config.url).map_err(|e| {
            warn!(error = %e, "handshake failed");
            ConnectorError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;

        if start.elapsed() > self.config.handshake_timeout {
            return Err(deadline_err());
        }

        configure_socket(&socket);

        *self.shared.socket.lock() = Some(socket);
        *self.shared.state.lock() = ConnectionState::Connected;
        self.shared.last_msg_ms.store(now_ms(), Ordering::Release);

        self.spawn_threads();
        info!(url = %self.config.url, "post client connected");
        Ok(())
    }

    fn spawn_threads(&self) {
        let shared = self.shared.clone();
        let writer = std::thread::Builder::new()
            .name("post-client-writer".into())
            .spawn(move || writer_loop(shared))
            .expect("spawn writer thread");
        *self.writer_handle.lock() = Some(writer);

        let shared = self.shared.clone();
        let reader = std::thread::Builder::new()
            .name("post-client-reader".into())
            .spawn(move || reader_loop(shared))
            .expect("spawn reader thread");
        *self.reader_handle.lock() = Some(reader);

        let shared = self.shared.clone();
        let ping_after = self.config.heartbeat_ping_after;
        let stale_after = self.config.heartbeat_stale_after;
        let heartbeat = std::thread::Builder::new()
            .name("post-client-heartbeat".into())
            .spawn(move || heartbeat_loop(shared, ping_after, stale_after))
            .expect("spawn heartbeat thread");
        *self.heartbeat_handle.lock() = Some(heartbeat);
    }

    /// Enqueue a correlated request, block up to `timeout` for the
    /// response. Returns `None` on timeout (a late response still
    /// completes the slot; see `PendingPost`).
    pub fn post(&self, request_type: &str, payload: Value, timeout: Duration) -> Result<Value, ConnectorError> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnectorError::NotConnected);
        }

        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let pending = PendingPost::new();
        self.shared.correlation.insert(id, pending.clone());

        let frame = OutboundFrame::Post(PostRequestFrame::new(id, request_type, payload));
        if self.shared.outbound_tx.send(frame).is_err() {
            self.shared.correlation.remove(&id);
            return Err(ConnectorError::NotConnected);
        }

        let response = pending.wait(timeout);
        self.shared.correlation.remove(&id);

        match response {
            Some(value) => Ok(value),
            None => Err(ConnectorError::PostTimeout(timeout.as_millis() as u64)),
        }
    }

    /// Fire-and-forget subscription frame. C4 keeps no subscription state;
    /// C7 is responsible for re-issuing subscriptions after reconnect.
    pub fn subscribe(&self, subscription: Value) -> Result<(), ConnectorError> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnectorError::NotConnected);
        }
        self.shared
            .outbound_tx
            .send(OutboundFrame::Subscribe(SubscribeFrame::new(subscription)))
            .map_err(|_| ConnectorError::NotConnected)
    }

    /// (a) sets stop flags, (b) shuts the socket down at the TCP level to
    /// unblock the reader — never a protocol-level close invoked from a
    /// non-reader thread, which is the deadlock class §9 warns about —
    /// (c) joins writer and reader, (d) fails every outstanding
    /// `PendingPost` with a synthetic timeout.
    pub fn close(&self) {
        self.shared.stop.store(true, Ordering::Release);

        if let Some(socket) = self.shared.socket.lock().as_ref() {
            shutdown_underlying_socket(socket);
        }

        if let Some(h) = self.writer_handle.lock().take() {
            let _ = h.join();
        }
        if let Some(h) = self.reader_handle.lock().take() {
            let _ = h.join();
        }
        if let Some(h) = self.heartbeat_handle.lock().take() {
            let _ = h.join();
        }

        for entry in self.shared.correlation.iter() {
            entry.value().fail_with_timeout();
        }
        self.shared.correlation.clear();

        *self.shared.state.lock() = ConnectionState::Disconnected;
        info!("post client closed");
    }
}

/// Enables TCP keepalive and `NO_DELAY`, and gives the reader thread a
/// short read timeout so its "blocking" read is in practice a cooperative
/// poll that re-checks the stop flag every 10ms instead of blocking
/// indefinitely (see the module doc's note on §4.3's "single-threaded
/// cooperative within" thread model).
fn configure_socket(socket: &WebSocket<Stream>) {
    use tungstenite::stream::MaybeTlsStream;
    let tcp = match socket.get_ref() {
        MaybeTlsStream::Plain(s) => s,
        MaybeTlsStream::NativeTls(s) => s.get_ref(),
        _ => return,
    };
    let _ = tcp.set_nodelay(true);
    let _ = tcp.set_read_timeout(Some(Duration::from_millis(10)));
}

/// TCP-level shutdown of the connection underlying `socket`, sufficient to
/// unblock a thread currently inside a blocking read on the same file
/// descriptor, without sending a WebSocket close frame.
fn shutdown_underlying_socket(socket: &WebSocket<Stream>) {
    use tungstenite::stream::MaybeTlsStream;
    match socket.get_ref() {
        MaybeTlsStream::Plain(s) => {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
        MaybeTlsStream::NativeTls(s) => {
            let _ = s.get_ref().shutdown(std::net::Shutdown::Both);
        }
        _ => {}
    }
}

fn writer_loop(shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Acquire) {
        match shared.outbound_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => {
                let text = match frame.to_json_text() {
                    Ok(t) => t,
                    Err(e) => {
                        error!(error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                };
                let mut guard = shared.socket.lock();
                if let Some(socket) = guard.as_mut() {
                    if let Err(e) = socket.send(Message::Text(text)) {
                        warn!(error = %e, "write failed, marking disconnected");
                        *shared.state.lock() = ConnectionState::Disconnected;
                        break;
                    }
                }
            }
            Err(channel::RecvTimeoutError::Timeout) => continue,
            Err(channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn reader_loop(shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Acquire) {
        let read_result = {
            let mut guard = shared.socket.lock();
            match guard.as_mut() {
                Some(socket) => socket.read(),
                None => break,
            }
        };

        match read_result {
            Ok(Message::Text(text)) => {
                shared.last_msg_ms.store(now_ms(), Ordering::Release);
                dispatch_inbound(&shared, &text);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                shared.last_msg_ms.store(now_ms(), Ordering::Release);
            }
            Ok(Message::Close(_)) => {
                info!("peer closed connection");
                *shared.state.lock() = ConnectionState::Disconnected;
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                if shared.stop.load(Ordering::Acquire) {
                    break;
                }
                warn!(error = %e, "read failed, marking disconnected");
                *shared.state.lock() = ConnectionState::Disconnected;
                break;
            }
        }
    }
}

fn dispatch_inbound(shared: &Arc<Shared>, text: &str) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "failed to parse inbound frame, dropping");
            return;
        }
    };

    match frame.channel.as_str() {
        "post" => {
            let Ok(data) = serde_json::from_value::<PostResponseData>(frame.data.clone()) else {
                debug!("malformed post response, dropping");
                return;
            };
            if let Some((_, pending)) = shared.correlation.remove(&data.id) {
                pending.complete(data.response);
            } else {
                debug!(id = data.id, "post response for unknown/expired request id");
            }
        }
        "pong" => {
            // no-op beyond the last_msg_ms refresh already recorded above.
        }
        _ => shared.listener.on_frame(frame),
    }
}

fn heartbeat_loop(shared: Arc<Shared>, ping_after: Duration, stale_after: Duration) {
    while !shared.stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_secs(5));
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        let now = now_ms();
        let last_msg = shared.last_msg_ms.load(Ordering::Acquire);
        let elapsed = now.saturating_sub(last_msg);

        if elapsed >= stale_after.as_millis() as u64 {
            warn!(elapsed_ms = elapsed, "transport stale, marking disconnected");
            shared.stale_events.fetch_add(1, Ordering::Relaxed);
            *shared.state.lock() = ConnectionState::Disconnected;
            if let Some(socket) = shared.socket.lock().as_ref() {
                shutdown_underlying_socket(socket);
            }
            for entry in shared.correlation.iter() {
                entry.value().fail_with_timeout();
            }
            continue;
        }

        if elapsed >= ping_after.as_millis() as u64 {
            let last_ping = shared.last_ping_sent_ms.load(Ordering::Acquire);
            if now.saturating_sub(last_ping) >= 15_000 {
                let _ = shared.outbound_tx.send(OutboundFrame::Ping);
                shared.last_ping_sent_ms.store(now, Ordering::Release);
            }
        }
    }
}
