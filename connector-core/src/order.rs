//! C2 — InFlightOrder.
//!
//! Per `spec.md` §9: the teacher's `order_fsm.rs` encodes lifecycle as
//! typestate (`OrderPending`, `OrderOpen`, ... each a distinct zero-sized
//! type, transitions consume `self`). That is generalized away here:
//! `InFlightOrder` is a single `Copy`-able value record with one
//! `OrderState` enum field. All synchronization and transition-legality
//! enforcement live one level up, in `OrderTracker` (`tracker.rs`) — this
//! module only holds data and the pure accounting functions (fill
//! aggregation, fill-percentage) that the teacher's `OrderData` also kept
//! free of locking.

use crate::error::ReasonCode;
use crate::ids::{OrderKind, PositionAction, Side};
use rust_decimal::Decimal;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed epsilon for float/decimal fuzzy comparison (§3 invariants).
/// `rust_decimal::Decimal` is exact, but venue-reported fill sizes can carry
/// trailing precision noise from string-to-decimal round trips, so the
/// comparisons in this module still go through this epsilon rather than
/// `==`.
pub const FILL_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8); // 0.00000001

/// Closed set of nine order states (§3). Transition legality is enforced by
/// [`OrderState::can_transition_to`], consulted exclusively from
/// `OrderTracker` — never from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderState {
    PendingCreate,
    PendingSubmit,
    Open,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Cancelled,
    Failed,
    Expired,
}

impl OrderState {
    /// Terminal states admit no further transition except... nothing:
    /// terminal is terminal. `spec.md` §3/glossary.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Failed | OrderState::Expired
        )
    }

    /// Whether `self -> to` is a legal transition per the directed graph in
    /// `spec.md` §3. `Failed` is reachable from any non-terminal state
    /// (explicit rejection), which is why it is checked first rather than
    /// enumerated per-arm.
    pub fn can_transition_to(self, to: OrderState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == OrderState::Failed {
            return true;
        }
        use OrderState::*;
        matches!(
            (self, to),
            (PendingCreate, PendingSubmit)
                | (PendingSubmit, Open)
                | (Open, PartiallyFilled)
                | (Open, Filled)
                | (Open, PendingCancel)
                | (Open, Cancelled)
                | (Open, Expired)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, PendingCancel)
                | (PartiallyFilled, Cancelled)
                | (PartiallyFilled, Expired)
                | (PendingCancel, Cancelled)
                | (PendingCancel, Filled)
                | (PendingCancel, PartiallyFilled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::PendingCreate => "PENDING_CREATE",
            OrderState::PendingSubmit => "PENDING_SUBMIT",
            OrderState::Open => "OPEN",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Filled => "FILLED",
            OrderState::PendingCancel => "PENDING_CANCEL",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Failed => "FAILED",
            OrderState::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn now_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// A single fill against an order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeUpdate {
    pub trade_id: String,
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub trading_pair: String,
    pub fill_price: Decimal,
    pub fill_base_amount: Decimal,
    pub fill_quote_amount: Decimal,
    pub fee_currency: String,
    pub fee_amount: Decimal,
    pub liquidity: crate::ids::Liquidity,
    pub timestamp_ns: u128,
}

/// A state delta pushed by C6 (or produced internally by C7's submission
/// task) into C3.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: String,
    pub new_state: OrderState,
    pub timestamp_ns: u128,
    pub reason: Option<String>,
    pub reason_code: Option<ReasonCode>,
}

/// Value-type record of one order's parameters, current state, and
/// accumulated fills. `Clone`, not `Copy`, because `fills` is a `Vec` — the
/// teacher's spec note calls for a "pure value record"; a growable fill
/// list is unavoidable for an order that can receive dozens of partial
/// fills, so this is as close to `Copy` as the data allows. Every read from
/// `OrderTracker` hands back a `clone()` of this type, never a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightOrder {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub trading_pair: String,
    pub side: Side,
    pub order_kind: OrderKind,
    pub position_action: PositionAction,
    pub price: Decimal,
    pub amount: Decimal,
    pub leverage: Option<u32>,
    pub state: OrderState,
    pub created_at_ns: u128,
    pub updated_at_ns: u128,
    pub fills: Vec<TradeUpdate>,
    pub filled_amount: Decimal,
    pub average_fill_price: Decimal,
    /// Consecutive `process_order_not_found` calls since the last
    /// acknowledged update; consulted only when `max_not_found_retries > 0`
    /// (Open Question 2).
    pub not_found_count: u32,
    /// The free-text reason attached to the most recent FAILED/CANCELLED
    /// update, if any (mirrors `OrderUpdate::reason`).
    pub reason: Option<String>,
    /// The canonical wire-level code for the same update, produced by C9
    /// (`reason::map_reason`) or `ConnectorError::reason_code`.
    pub reason_code: Option<ReasonCode>,
}

impl InFlightOrder {
    /// Constructs a new order in `PENDING_CREATE`, per §4.7 step 4.
    pub fn new(
        client_order_id: String,
        trading_pair: String,
        side: Side,
        order_kind: OrderKind,
        position_action: PositionAction,
        price: Decimal,
        amount: Decimal,
        leverage: Option<u32>,
    ) -> Self {
        let now = now_ns();
        Self {
            client_order_id,
            exchange_order_id: None,
            trading_pair,
            side,
            order_kind,
            position_action,
            price,
            amount,
            leverage,
            state: OrderState::PendingCreate,
            created_at_ns: now,
            updated_at_ns: now,
            fills: Vec::new(),
            filled_amount: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            not_found_count: 0,
            reason: None,
            reason_code: None,
        }
    }

    /// Recomputes `filled_amount` and `average_fill_price` from the fill
    /// sequence from scratch. `spec.md` §4.2 is explicit that this must not
    /// be incremental ("to avoid drift").
    pub fn recompute_fill_accounting(&mut self) {
        let mut total_qty = Decimal::ZERO;
        let mut total_notional = Decimal::ZERO;
        for fill in &self.fills {
            total_qty += fill.fill_base_amount;
            total_notional += fill.fill_price * fill.fill_base_amount;
        }
        self.filled_amount = total_qty;
        self.average_fill_price = if total_qty.is_zero() {
            Decimal::ZERO
        } else {
            total_notional / total_qty
        };
    }

    /// Whether `filled_amount` has reached `amount` within epsilon.
    pub fn is_fully_filled(&self) -> bool {
        self.filled_amount >= self.amount - FILL_EPSILON
    }

    pub fn remaining_amount(&self) -> Decimal {
        (self.amount - self.filled_amount).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Liquidity;
    use rust_decimal_macros::dec;

    fn base_order() -> InFlightOrder {
        InFlightOrder::new(
            "LS-1-0".into(),
            "BTC-USD".into(),
            Side::Buy,
            OrderKind::Limit,
            PositionAction::Open,
            dec!(50000),
            dec!(0.10),
            None,
        )
    }

    fn fill(order: &InFlightOrder, id: &str, price: Decimal, qty: Decimal) -> TradeUpdate {
        TradeUpdate {
            trade_id: id.into(),
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: "123".into(),
            trading_pair: order.trading_pair.clone(),
            fill_price: price,
            fill_base_amount: qty,
            fill_quote_amount: price * qty,
            fee_currency: "USD".into(),
            fee_amount: Decimal::ZERO,
            liquidity: Liquidity::Maker,
            timestamp_ns: 0,
        }
    }

    #[test]
    fn new_order_is_pending_create() {
        let order = base_order();
        assert_eq!(order.state, OrderState::PendingCreate);
        assert!(order.exchange_order_id.is_none());
        assert!(order.fills.is_empty());
    }

    #[test]
    fn fill_accounting_matches_spec_invariant_1() {
        let mut order = base_order();
        order.fills.push(fill(&order, "t1", dec!(50000), dec!(0.04)));
        order.fills.push(fill(&order, "t2", dec!(50000), dec!(0.06)));
        order.recompute_fill_accounting();

        let sum: Decimal = order.fills.iter().map(|f| f.fill_base_amount).sum();
        assert_eq!(order.filled_amount, sum);
        assert_eq!(order.average_fill_price, dec!(50000));
        assert!(order.is_fully_filled());
    }

    #[test]
    fn partial_fill_is_not_fully_filled() {
        let mut order = base_order();
        order.fills.push(fill(&order, "t1", dec!(50000), dec!(0.04)));
        order.recompute_fill_accounting();
        assert!(!order.is_fully_filled());
        assert_eq!(order.remaining_amount(), dec!(0.06));
    }

    #[test]
    fn weighted_average_price_across_different_prices() {
        let mut order = base_order();
        order.fills.push(fill(&order, "t1", dec!(50000), dec!(0.05)));
        order.fills.push(fill(&order, "t2", dec!(51000), dec!(0.05)));
        order.recompute_fill_accounting();
        assert_eq!(order.average_fill_price, dec!(50500));
    }

    #[test]
    fn legal_transitions_match_spec_graph() {
        use OrderState::*;
        assert!(PendingCreate.can_transition_to(PendingSubmit));
        assert!(PendingSubmit.can_transition_to(Open));
        assert!(PendingSubmit.can_transition_to(Failed));
        assert!(Open.can_transition_to(PartiallyFilled));
        assert!(Open.can_transition_to(Filled));
        assert!(Open.can_transition_to(PendingCancel));
        assert!(PendingCancel.can_transition_to(Cancelled));
        assert!(PendingCancel.can_transition_to(Filled));
        assert!(PendingCancel.can_transition_to(PartiallyFilled));
    }

    #[test]
    fn illegal_transitions_rejected() {
        use OrderState::*;
        assert!(!PendingCreate.can_transition_to(Open));
        assert!(!Filled.can_transition_to(Open));
        assert!(!Cancelled.can_transition_to(PartiallyFilled));
    }

    #[test]
    fn any_nonterminal_state_may_fail() {
        use OrderState::*;
        assert!(PendingCreate.can_transition_to(Failed));
        assert!(Open.can_transition_to(Failed));
        assert!(PartiallyFilled.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_accept_no_transition() {
        use OrderState::*;
        for terminal in [Filled, Cancelled, Failed, Expired] {
            for to in [
                PendingCreate,
                PendingSubmit,
                Open,
                PartiallyFilled,
                Filled,
                PendingCancel,
                Cancelled,
                Failed,
                Expired,
            ] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn hundred_small_fills_sum_exactly() {
        let mut order = InFlightOrder::new(
            "LS-1-1".into(),
            "BTC-USD".into(),
            Side::Buy,
            OrderKind::Limit,
            PositionAction::Open,
            dec!(50000),
            dec!(1.00),
            None,
        );
        for i in 0..100 {
            order
                .fills
                .push(fill(&order, &format!("t{i}"), dec!(50000), dec!(0.01)));
        }
        order.recompute_fill_accounting();
        assert!(order.is_fully_filled());
        assert_eq!(order.filled_amount, dec!(1.00));
    }
}
