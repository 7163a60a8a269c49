//! C8 — Event Publisher.
//!
//! Per `spec.md` §9: the source kept in-process callbacks and out-of-process
//! pub/sub as two separate systems; this rewrite makes C8 "one sink with
//! two fanouts" so the strategy and downstream systems can never observe
//! drift. `TrackerListener` (tracker.rs) invokes this module's
//! `EventPublisher` once per state change; `EventPublisher` fans that one
//! event out to (a) every registered in-process listener callback and (b)
//! a JSON payload on the external bus, non-blocking on both sides.

use crate::order::{InFlightOrder, OrderState};
use crate::tracker::TrackerListener;
use parking_lot::RwLock;
use prometheus::IntCounter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// The event kinds a strategy can subscribe to in-process (§4.6/§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    OrderUpdate,
    OrderCreated,
    PartialFill,
    OrderCompleted,
    OrderCancelled,
    OrderFailed,
}

impl EventKind {
    fn topic_suffix(self) -> &'static str {
        match self {
            EventKind::OrderUpdate => "update",
            EventKind::OrderCreated => "created",
            EventKind::PartialFill => "partial_fill",
            EventKind::OrderCompleted => "filled",
            EventKind::OrderCancelled => "cancelled",
            EventKind::OrderFailed => "failed",
        }
    }
}

/// Wire payload for a single event (§6 "Event bus publications").
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub event_type: &'static str,
    pub timestamp: u128,
    pub data: EventData,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventData {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: String,
    pub order_type: &'static str,
    pub trade_type: &'static str,
    pub price: rust_decimal::Decimal,
    pub amount: rust_decimal::Decimal,
    pub filled_amount: rust_decimal::Decimal,
    pub average_executed_price: rust_decimal::Decimal,
    pub order_state: &'static str,
    pub creation_timestamp: u128,
    pub last_update_timestamp: u128,
    pub fee_paid: rust_decimal::Decimal,
    pub fee_asset: String,
    pub reason: Option<String>,
    pub canonical_code: Option<&'static str>,
}

fn order_type_str(order: &InFlightOrder) -> &'static str {
    match order.order_kind {
        crate::ids::OrderKind::Limit => "LIMIT",
        crate::ids::OrderKind::Market => "MARKET",
        crate::ids::OrderKind::LimitMaker => "LIMIT_MAKER",
    }
}

fn trade_type_str(order: &InFlightOrder) -> &'static str {
    match order.side {
        crate::ids::Side::Buy => "BUY",
        crate::ids::Side::Sell => "SELL",
    }
}

fn build_payload(kind: EventKind, order: &InFlightOrder) -> EventPayload {
    let fee_paid = order.fills.iter().map(|f| f.fee_amount).sum();
    let fee_asset = order
        .fills
        .last()
        .map(|f| f.fee_currency.clone())
        .unwrap_or_default();

    EventPayload {
        event_type: kind.topic_suffix(),
        timestamp: order.updated_at_ns,
        data: EventData {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: order.exchange_order_id.clone(),
            trading_pair: order.trading_pair.clone(),
            order_type: order_type_str(order),
            trade_type: trade_type_str(order),
            price: order.price,
            amount: order.amount,
            filled_amount: order.filled_amount,
            average_executed_price: order.average_fill_price,
            order_state: order.state.as_str(),
            creation_timestamp: order.created_at_ns,
            last_update_timestamp: order.updated_at_ns,
            fee_paid,
            fee_asset,
            reason: order.reason.clone(),
            canonical_code: order.reason_code.map(|c| c.as_str()),
        },
    }
}

/// In-process listener interface. A strategy registers one of these to
/// receive every lifecycle event for orders it cares about.
pub trait EventListener: Send + Sync {
    fn on_order_created(&self, _payload: &EventPayload) {}
    fn on_order_update(&self, _payload: &EventPayload) {}
    fn on_partial_fill(&self, _payload: &EventPayload) {}
    fn on_order_completed(&self, _payload: &EventPayload) {}
    fn on_order_cancelled(&self, _payload: &EventPayload) {}
    fn on_order_failed(&self, _payload: &EventPayload) {}
}

/// Out-of-process fanout: serializes payloads and publishes them as JSON
/// text to the external bus under `<prefix>.{suffix}` topics. The bus
/// backend itself (the socket/IPC transport to the message-bus process) is
/// out of scope (§1); this trait is the narrow boundary C8 talks to.
pub trait BusPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload_json: &str);
}

/// A `BusPublisher` that does nothing — used when no `event_bus_endpoint`
/// is configured, and in tests.
pub struct NullBusPublisher;
impl BusPublisher for NullBusPublisher {
    fn publish(&self, _topic: &str, _payload_json: &str) {}
}

pub struct EventPublisher {
    topic_prefix: String,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    bus: Arc<dyn BusPublisher>,
    dropped_total: AtomicU64,
    drop_hook: Option<IntCounter>,
}

impl EventPublisher {
    pub fn new(topic_prefix: String, bus: Arc<dyn BusPublisher>) -> Self {
        Self {
            topic_prefix,
            listeners: RwLock::new(Vec::new()),
            bus,
            dropped_total: AtomicU64::new(0),
            drop_hook: None,
        }
    }

    /// Mirrors drop counts into `ConnectorMetrics::events_dropped_total` as
    /// well as this publisher's own `dropped_total`, so a caller that only
    /// has the metrics registry still observes bus-publish failures.
    pub fn with_drop_counter(mut self, counter: IntCounter) -> Self {
        self.drop_hook = Some(counter);
        self
    }

    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Fans a single event out to every in-process listener and to the
    /// external bus. Both fanouts are non-blocking; a serialization or
    /// publish failure is logged and counted, never propagated (§4.8
    /// "failures never affect tracking correctness").
    pub fn emit(&self, kind: EventKind, order: &InFlightOrder) {
        let payload = build_payload(kind, order);

        for listener in self.listeners.read().iter() {
            match kind {
                EventKind::OrderCreated => listener.on_order_created(&payload),
                EventKind::OrderUpdate => listener.on_order_update(&payload),
                EventKind::PartialFill => listener.on_partial_fill(&payload),
                EventKind::OrderCompleted => listener.on_order_completed(&payload),
                EventKind::OrderCancelled => listener.on_order_cancelled(&payload),
                EventKind::OrderFailed => listener.on_order_failed(&payload),
            }
        }

        match serde_json::to_string(&payload) {
            Ok(json) => {
                let topic = format!("{}.{}", self.topic_prefix, kind.topic_suffix());
                self.bus.publish(&topic, &json);
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize event payload, dropping bus publication");
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                if let Some(counter) = &self.drop_hook {
                    counter.inc();
                }
            }
        }
    }
}

/// Adapts `EventPublisher` to the `TrackerListener` interface C3 expects,
/// deriving the right `EventKind` from the observed state transition.
pub struct TrackerEventBridge {
    publisher: Arc<EventPublisher>,
}

impl TrackerEventBridge {
    pub fn new(publisher: Arc<EventPublisher>) -> Self {
        Self { publisher }
    }
}

impl TrackerListener for TrackerEventBridge {
    fn on_order_event(&self, order: &InFlightOrder, previous_state: Option<OrderState>) {
        let kind = match order.state {
            OrderState::Open if previous_state != Some(OrderState::Open) => EventKind::OrderCreated,
            OrderState::PartiallyFilled => EventKind::PartialFill,
            OrderState::Filled => EventKind::OrderCompleted,
            OrderState::Cancelled => EventKind::OrderCancelled,
            OrderState::Failed => EventKind::OrderFailed,
            _ => EventKind::OrderUpdate,
        };
        debug!(client_id = %order.client_order_id, state = %order.state, "emitting order event");
        self.publisher.emit(kind, order);
    }
}
