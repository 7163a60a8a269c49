//! Shared scaffolding for integration tests: a scriptable loopback venue
//! server standing in for Hyperliquid's websocket endpoint, and a couple of
//! recording listeners for asserting on event order.

use connector_core::connector::TransportFactory;
use connector_core::events::{EventListener, EventPayload, EventPublisher, NullBusPublisher};
use connector_core::transport::{FrameListener, PostClientConfig};
use connector_core::user_stream::UserStreamIngestor;
use connector_core::venue::{TradingRule, TradingRules};
use connector_core::{ConnectorFacade, ConnectorMetrics, OrderTracker, PostClient, SignerBridge};
use dashmap::DashMap;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tungstenite::{Message, WebSocket};

pub struct MockVenue {
    listener: TcpListener,
    pub url: String,
}

impl MockVenue {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        Self {
            listener,
            url: format!("ws://{addr}"),
        }
    }

    /// Accepts exactly one connection (the crate under test's `PostClient`)
    /// and runs `script` against it on a background thread.
    pub fn serve<F>(self, script: F) -> JoinHandle<()>
    where
        F: FnOnce(&mut WebSocket<TcpStream>) + Send + 'static,
    {
        std::thread::spawn(move || {
            let (stream, _) = self.listener.accept().expect("mock venue accept");
            let mut ws = tungstenite::accept(stream).expect("mock venue handshake");
            script(&mut ws);
        })
    }

    /// Accepts connections in a loop, handing each one to `script` along with
    /// its zero-based attempt index — for exercising reconnect behavior,
    /// where the first connection drops and a later one must serve the
    /// request. `script` returns `false` to stop accepting further
    /// connections.
    pub fn serve_multiple<F>(self, mut script: F) -> JoinHandle<()>
    where
        F: FnMut(&mut WebSocket<TcpStream>, usize) -> bool + Send + 'static,
    {
        std::thread::spawn(move || {
            let mut attempt = 0;
            loop {
                let (stream, _) = match self.listener.accept() {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let mut ws = match tungstenite::accept(stream) {
                    Ok(ws) => ws,
                    Err(_) => break,
                };
                let keep_going = script(&mut ws, attempt);
                attempt += 1;
                if !keep_going {
                    break;
                }
            }
        })
    }
}

/// Reads the next inbound `{"method":"post",...}` frame, skipping anything
/// else (pings), and returns `(id, request_type, payload)`.
pub fn read_post(ws: &mut WebSocket<TcpStream>) -> (u64, String, Value) {
    loop {
        if let Message::Text(text) = ws.read().expect("mock venue read") {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame.get("method").and_then(|m| m.as_str()) == Some("post") {
                let id = frame["id"].as_u64().unwrap();
                let request_type = frame["request"]["type"].as_str().unwrap().to_string();
                let payload = frame["request"]["payload"].clone();
                return (id, request_type, payload);
            }
        }
    }
}

pub fn reply_post(ws: &mut WebSocket<TcpStream>, id: u64, response: Value) {
    let frame = json!({"channel": "post", "data": {"id": id, "response": response}});
    ws.send(Message::Text(frame.to_string())).expect("mock venue send");
}

pub fn push_channel(ws: &mut WebSocket<TcpStream>, channel: &str, data: Value) {
    let frame = json!({"channel": channel, "data": data});
    ws.send(Message::Text(frame.to_string())).expect("mock venue send");
}

/// Path to the fixture signer script, resolved relative to the crate root
/// (Cargo sets the integration test binary's cwd there).
pub fn fake_signer_path() -> String {
    "tests/fixtures/fake_signer.sh".to_string()
}

/// Records every event payload it receives, in arrival order, behind a
/// plain `Mutex` (tests assert from the main thread after the scenario
/// completes, never concurrently with new events).
pub struct RecordingListener {
    pub payloads: Mutex<Vec<EventPayload>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.payloads.lock().unwrap().iter().map(|p| p.event_type).collect()
    }

    pub fn len(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }
}

/// Wires a full [`ConnectorFacade`] against a mock venue at `url`: real
/// tracker, real transport, a real `UserStreamIngestor` so channel pushes
/// reach the tracker, and a real `SignerBridge` pointed at the fixture
/// signer script — everything C7 owns, assembled in the order
/// `ConnectorFacade::make_tracker_listener` requires (cancel waiters and
/// the tracker's listener before the tracker itself).
pub fn build_facade(
    url: &str,
    auto_cleanup: bool,
) -> (ConnectorFacade, Arc<OrderTracker>, Arc<RecordingListener>) {
    let metrics = Arc::new(ConnectorMetrics::new().unwrap());

    let events = Arc::new(
        EventPublisher::new("orders.hyperliquid".into(), Arc::new(NullBusPublisher))
            .with_drop_counter(metrics.events_dropped_total.clone()),
    );
    let recorder = RecordingListener::new();
    events.register_listener(recorder.clone());

    let cancel_waiters = Arc::new(DashMap::new());
    let tracker_listener =
        ConnectorFacade::make_tracker_listener(events.clone(), cancel_waiters.clone(), metrics.clone());
    let tracker = Arc::new(OrderTracker::new(auto_cleanup, 0, tracker_listener));

    let ingestor: Arc<dyn FrameListener> = Arc::new(UserStreamIngestor::new(tracker.clone()));
    let venue_url = url.to_string();
    let transport_factory: TransportFactory = Arc::new(move || {
        Some(Arc::new(PostClient::new(
            PostClientConfig {
                url: venue_url.clone(),
                post_timeout: Duration::from_secs(2),
                heartbeat_ping_after: Duration::from_secs(60),
                heartbeat_stale_after: Duration::from_secs(60),
                handshake_timeout: Duration::from_secs(5),
            },
            ingestor.clone(),
        )))
    });
    let transport = transport_factory().expect("transport factory always yields a client");
    transport.connect().expect("connect to mock venue");

    let signer = Arc::new(
        SignerBridge::spawn("sh", &[&fake_signer_path()], Duration::from_secs(1)).unwrap(),
    );

    let mut rules = TradingRules::new();
    rules.insert(
        "BTC-USD",
        TradingRule {
            asset_index: 0,
            tick_size: dec!(1),
            lot_step: dec!(0.01),
            min_notional: dec!(1),
        },
    );
    let rules = Arc::new(rules);

    let facade = ConnectorFacade::new(
        tracker.clone(),
        transport,
        transport_factory,
        signer,
        events,
        metrics,
        rules,
        "LS".into(),
        false,
        Duration::from_secs(2),
        cancel_waiters,
    );

    (facade, tracker, recorder)
}

impl EventListener for RecordingListener {
    fn on_order_created(&self, p: &EventPayload) {
        self.payloads.lock().unwrap().push(p.clone());
    }
    fn on_order_update(&self, p: &EventPayload) {
        self.payloads.lock().unwrap().push(p.clone());
    }
    fn on_partial_fill(&self, p: &EventPayload) {
        self.payloads.lock().unwrap().push(p.clone());
    }
    fn on_order_completed(&self, p: &EventPayload) {
        self.payloads.lock().unwrap().push(p.clone());
    }
    fn on_order_cancelled(&self, p: &EventPayload) {
        self.payloads.lock().unwrap().push(p.clone());
    }
    fn on_order_failed(&self, p: &EventPayload) {
        self.payloads.lock().unwrap().push(p.clone());
    }
}
