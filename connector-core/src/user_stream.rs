//! C6 — UserStream Ingestor.
//!
//! Consumes `PostClient`'s non-correlation frames (§4.5) and translates
//! them into `OrderUpdate`/`TradeUpdate` calls on `OrderTracker`. Holds no
//! lifetime stake in C4 (§3 Ownership: "C6 holds no lifetime stake in C4")
//! — it only implements [`crate::transport::FrameListener`] and is handed
//! to `PostClient` at construction, the same shape as `order_bridge.rs`'s
//! pure translation functions (`legacy_order_to_pending`, etc.), generalized
//! from a one-shot conversion call into a push-driven router.

use crate::order::{OrderState, OrderUpdate, TradeUpdate};
use crate::tracker::OrderTracker;
use crate::transport::{FrameListener, InboundFrame};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

fn now_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Venue status string -> internal state, table-driven per §4.5 ("must be
/// table-driven"). `None` for a status this ingestor doesn't recognize as a
/// terminal/ack signal — falls back to partial-fill-size comparison, never
/// trusting a venue-computed flag alone.
fn map_venue_status(status: &str) -> Option<OrderState> {
    match status {
        "resting" | "open" => Some(OrderState::Open),
        "filled" => Some(OrderState::Filled),
        "cancelled" | "canceled" => Some(OrderState::Cancelled),
        "rejected" => Some(OrderState::Failed),
        "expired" => Some(OrderState::Expired),
        _ => None,
    }
}

fn decimal_field(value: &serde_json::Value, key: &str) -> Decimal {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| Decimal::from_str(s).ok())
        .unwrap_or(Decimal::ZERO)
}

fn string_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

pub struct UserStreamIngestor {
    tracker: Arc<OrderTracker>,
}

impl UserStreamIngestor {
    pub fn new(tracker: Arc<OrderTracker>) -> Self {
        Self { tracker }
    }

    fn handle_order_update(&self, entry: &serde_json::Value) {
        let client_id = string_field(entry, "client_order_id");
        if client_id.is_empty() {
            debug!("order update with no client_order_id, dropping");
            return;
        }
        let status = string_field(entry, "status");
        let Some(new_state) = map_venue_status(&status) else {
            debug!(status, "unrecognized venue status, dropping");
            return;
        };

        let exchange_order_id = entry
            .get("oid")
            .map(|v| v.to_string().trim_matches('"').to_string())
            .filter(|s| !s.is_empty());

        let reason = entry.get("reason").and_then(|v| v.as_str()).map(str::to_string);
        let reason_code = reason.as_deref().map(crate::reason::map_reason);

        self.tracker.process_order_update(OrderUpdate {
            client_order_id: client_id,
            exchange_order_id,
            trading_pair: string_field(entry, "coin"),
            new_state,
            timestamp_ns: now_ns(),
            reason,
            reason_code,
        });
    }

    fn handle_fill(&self, entry: &serde_json::Value) {
        let client_id = string_field(entry, "client_order_id");
        if client_id.is_empty() {
            debug!("fill with no client_order_id, dropping");
            return;
        }
        let liquidity = if entry.get("crossed").and_then(|v| v.as_bool()).unwrap_or(false) {
            crate::ids::Liquidity::Taker
        } else {
            crate::ids::Liquidity::Maker
        };

        self.tracker.process_trade_update(TradeUpdate {
            trade_id: string_field(entry, "tid"),
            client_order_id: client_id,
            exchange_order_id: string_field(entry, "oid"),
            trading_pair: string_field(entry, "coin"),
            fill_price: decimal_field(entry, "px"),
            fill_base_amount: decimal_field(entry, "sz"),
            fill_quote_amount: decimal_field(entry, "px") * decimal_field(entry, "sz"),
            fee_currency: string_field(entry, "feeToken"),
            fee_amount: decimal_field(entry, "fee"),
            liquidity,
            timestamp_ns: now_ns(),
        });
    }
}

impl FrameListener for UserStreamIngestor {
    fn on_frame(&self, frame: InboundFrame) {
        let entries: Vec<serde_json::Value> = match &frame.data {
            serde_json::Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };

        match frame.channel.as_str() {
            "orderUpdates" | "orders" => {
                for entry in &entries {
                    self.handle_order_update(entry);
                }
            }
            "userFills" | "fills" => {
                for entry in &entries {
                    self.handle_fill(entry);
                }
            }
            other => {
                warn!(channel = other, "unknown channel, dropping frame");
            }
        }
    }
}
