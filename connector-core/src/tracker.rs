//! C3 — OrderTracker.
//!
//! Thread-safe registry, owning the full set of [`InFlightOrder`] records.
//! Dual index (client-id primary, exchange-id secondary) under a single
//! `parking_lot::RwLock`, the same reader-writer-exclusion idiom the
//! teacher uses for its coarser shared state (`risk/rate_limiter.rs`'s
//! `last_refill` mutex, generalized here to a read-mostly map rather than a
//! single `Instant`). Every read returns an owned `clone()` — no aliasing
//! into tracker storage, per `spec.md` §4.2/§5.

use crate::order::{InFlightOrder, OrderState, OrderUpdate, TradeUpdate};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One lifecycle callback per state-changing operation (§4.6's event
/// publication contract: "exactly one in-process callback"). `OrderTracker`
/// is generic over the listener so C8 (event publisher) can be plugged in
/// without `tracker.rs` depending on `events.rs`.
pub trait TrackerListener: Send + Sync {
    fn on_order_event(&self, order: &InFlightOrder, previous_state: Option<OrderState>);
}

/// No-op listener, useful for tests that only assert on tracker state.
pub struct NullListener;
impl TrackerListener for NullListener {
    fn on_order_event(&self, _order: &InFlightOrder, _previous_state: Option<OrderState>) {}
}

struct Inner {
    by_client_id: HashMap<String, InFlightOrder>,
    by_exchange_id: HashMap<String, String>,
}

pub struct OrderTracker {
    inner: RwLock<Inner>,
    auto_cleanup: bool,
    max_not_found_retries: u32,
    listener: Box<dyn TrackerListener>,
}

impl OrderTracker {
    pub fn new(auto_cleanup: bool, max_not_found_retries: u32, listener: Box<dyn TrackerListener>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_client_id: HashMap::new(),
                by_exchange_id: HashMap::new(),
            }),
            auto_cleanup,
            max_not_found_retries,
            listener,
        }
    }

    /// Inserts a new order by client-id. Fails if the client-id is already
    /// present — this is the write side of the track-before-submit
    /// invariant (§4.7 step 5): the caller MUST call this before any I/O.
    pub fn start_tracking(&self, order: InFlightOrder) -> Result<(), crate::error::ConnectorError> {
        let mut inner = self.inner.write();
        if inner.by_client_id.contains_key(&order.client_order_id) {
            return Err(crate::error::ConnectorError::DuplicateClientOrderId(
                order.client_order_id.clone(),
            ));
        }
        inner
            .by_client_id
            .insert(order.client_order_id.clone(), order);
        Ok(())
    }

    pub fn stop_tracking(&self, client_id: &str) {
        let mut inner = self.inner.write();
        if let Some(order) = inner.by_client_id.remove(client_id) {
            if let Some(eid) = order.exchange_order_id {
                inner.by_exchange_id.remove(&eid);
            }
        }
    }

    pub fn get_order(&self, client_id: &str) -> Option<InFlightOrder> {
        self.inner.read().by_client_id.get(client_id).cloned()
    }

    pub fn get_order_by_exchange_id(&self, exchange_id: &str) -> Option<InFlightOrder> {
        let inner = self.inner.read();
        let client_id = inner.by_exchange_id.get(exchange_id)?;
        inner.by_client_id.get(client_id).cloned()
    }

    pub fn get_open_orders(&self, trading_pair: Option<&str>) -> Vec<InFlightOrder> {
        self.inner
            .read()
            .by_client_id
            .values()
            .filter(|o| !o.state.is_terminal())
            .filter(|o| trading_pair.map(|p| p == o.trading_pair).unwrap_or(true))
            .cloned()
            .collect()
    }

    fn maybe_cleanup_locked(inner: &mut Inner, client_id: &str) {
        if let Some(order) = inner.by_client_id.get(client_id) {
            if order.state.is_terminal() {
                if let Some(eid) = order.exchange_order_id.clone() {
                    inner.by_exchange_id.remove(&eid);
                }
                inner.by_client_id.remove(client_id);
            }
        }
    }

    /// Applies an [`OrderUpdate`]: binds the exchange-id (write-once),
    /// advances state if the transition is legal, timestamps, fires the
    /// listener callback, and auto-cleans terminal entries if configured.
    pub fn process_order_update(&self, update: OrderUpdate) {
        let mut inner = self.inner.write();
        let Some(order) = inner.by_client_id.get_mut(&update.client_order_id) else {
            warn!(client_id = %update.client_order_id, "order update for unknown client id, dropping");
            return;
        };

        if let Some(eid) = &update.exchange_order_id {
            match &order.exchange_order_id {
                None => {
                    order.exchange_order_id = Some(eid.clone());
                    inner
                        .by_exchange_id
                        .insert(eid.clone(), update.client_order_id.clone());
                }
                Some(existing) if existing != eid => {
                    warn!(
                        client_id = %update.client_order_id,
                        existing, attempted = %eid,
                        "refusing to overwrite exchange order id"
                    );
                }
                Some(_) => {}
            }
        }

        let order = inner.by_client_id.get_mut(&update.client_order_id).unwrap();
        if !order.state.can_transition_to(update.new_state) {
            warn!(
                client_id = %update.client_order_id,
                from = %order.state, to = %update.new_state,
                "illegal state transition rejected"
            );
            return;
        }

        let previous_state = Some(order.state);
        order.state = update.new_state;
        order.updated_at_ns = update.timestamp_ns;
        order.not_found_count = 0;
        order.reason = update.reason.clone();
        order.reason_code = update.reason_code;
        let snapshot = order.clone();

        if self.auto_cleanup && snapshot.state.is_terminal() {
            Self::maybe_cleanup_locked(&mut inner, &update.client_order_id);
        }
        drop(inner);

        self.listener.on_order_event(&snapshot, previous_state);
    }

    /// Applies a [`TradeUpdate`]: appends the fill (deduplicated by
    /// trade-id), recomputes accounting from scratch, derives the new
    /// state, fires the listener, auto-cleans if terminal.
    ///
    /// A fill against an already-terminal `CANCELLED`/`FAILED`/`EXPIRED`
    /// order is a legitimate race (§4.2) and is dropped with a warning
    /// rather than applied.
    pub fn process_trade_update(&self, trade: TradeUpdate) {
        let mut inner = self.inner.write();
        let Some(order) = inner.by_client_id.get_mut(&trade.client_order_id) else {
            warn!(client_id = %trade.client_order_id, "trade update for unknown client id, dropping");
            return;
        };

        if matches!(
            order.state,
            OrderState::Cancelled | OrderState::Failed | OrderState::Expired
        ) {
            warn!(
                client_id = %trade.client_order_id, state = %order.state,
                "trade update arrived after terminal state, dropping"
            );
            return;
        }

        if order.fills.iter().any(|f| f.trade_id == trade.trade_id) {
            debug!(trade_id = %trade.trade_id, "duplicate trade id, ignoring");
            return;
        }

        if !trade.exchange_order_id.is_empty() && order.exchange_order_id.is_none() {
            order.exchange_order_id = Some(trade.exchange_order_id.clone());
            inner
                .by_exchange_id
                .insert(trade.exchange_order_id.clone(), trade.client_order_id.clone());
        }

        let order = inner.by_client_id.get_mut(&trade.client_order_id).unwrap();
        order.fills.push(trade.clone());
        order.recompute_fill_accounting();

        let target_state = if order.is_fully_filled() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };

        // A trade arriving before the OPEN ack, or while PENDING_CANCEL, is
        // legal (§4.2): any non-terminal state may jump directly to
        // PartiallyFilled/Filled. Terminal states were already filtered out
        // above.
        let previous_state = Some(order.state);
        order.state = target_state;
        order.updated_at_ns = trade.timestamp_ns;
        let snapshot = order.clone();

        if self.auto_cleanup && snapshot.state.is_terminal() {
            Self::maybe_cleanup_locked(&mut inner, &trade.client_order_id);
        }
        drop(inner);

        self.listener.on_order_event(&snapshot, previous_state);
    }

    /// Increments the per-order not-found counter; after
    /// `max_not_found_retries` consecutive calls, synthesizes a `CANCELLED`
    /// update. A no-op when `max_not_found_retries == 0` (Open Question 2:
    /// off by default on this venue).
    pub fn process_order_not_found(&self, client_id: &str, now_ns: u128) {
        if self.max_not_found_retries == 0 {
            return;
        }
        let should_cancel = {
            let mut inner = self.inner.write();
            let Some(order) = inner.by_client_id.get_mut(client_id) else {
                return;
            };
            order.not_found_count += 1;
            order.not_found_count >= self.max_not_found_retries
        };
        if should_cancel {
            self.process_order_update(OrderUpdate {
                client_order_id: client_id.to_string(),
                exchange_order_id: None,
                trading_pair: String::new(),
                new_state: OrderState::Cancelled,
                timestamp_ns: now_ns,
                reason: Some("synthesized after repeated not-found".to_string()),
                reason_code: Some(crate::error::ReasonCode::NetworkError),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_client_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
