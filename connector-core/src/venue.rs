//! Hyperliquid-specific wire payload construction and quantization rules.
//!
//! Kept separate from `connector.rs` so the façade's submission protocol
//! reads as venue-agnostic orchestration, with only this module knowing the
//! exact JSON shape of an order payload (§6 "Order payload (venue-canonical)").

use crate::error::ConnectorError;
use crate::ids::{OrderKind, PositionAction, Side};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Per-pair tick size (price increment) and lot step (amount increment), plus
/// a minimum notional below which an order is rejected before it ever
/// reaches the wire. Quantization itself (§4.7 step 3) is pure arithmetic;
/// looking the rule up by pair is this module's job.
#[derive(Debug, Clone, Copy)]
pub struct TradingRule {
    pub asset_index: u32,
    pub tick_size: Decimal,
    pub lot_step: Decimal,
    pub min_notional: Decimal,
}

/// Static registry of trading rules, keyed by pair. In production this would
/// be populated from the venue's `meta` endpoint at startup; that refresh is
/// out of scope here (§1 — orderbook/market-data maintenance is reused via
/// an adapter, not reimplemented), so callers seed it directly.
#[derive(Debug, Clone, Default)]
pub struct TradingRules {
    rules: HashMap<String, TradingRule>,
}

impl TradingRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pair: impl Into<String>, rule: TradingRule) {
        self.rules.insert(pair.into(), rule);
    }

    pub fn get(&self, pair: &str) -> Option<&TradingRule> {
        self.rules.get(pair)
    }
}

/// Rounds `value` down to the nearest multiple of `step` (never rounds up —
/// an amount rounded up could exceed the caller's intended exposure).
fn quantize_down(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).trunc() * step
}

/// Quantizes price and amount against a pair's trading rule (§4.7 step 3).
/// Returns `InvalidParams` if the quantized amount is zero or the resulting
/// notional falls below `min_notional`.
pub fn quantize(
    rule: &TradingRule,
    price: Decimal,
    amount: Decimal,
) -> Result<(Decimal, Decimal), ConnectorError> {
    let q_price = quantize_down(price, rule.tick_size);
    let q_amount = quantize_down(amount, rule.lot_step);

    if q_amount.is_zero() {
        return Err(ConnectorError::InvalidParams(
            "quantized amount rounds to zero".to_string(),
        ));
    }
    let notional = q_price * q_amount;
    if !price.is_zero() && notional < rule.min_notional {
        return Err(ConnectorError::InvalidParams(format!(
            "notional {notional} below minimum {}",
            rule.min_notional
        )));
    }
    Ok((q_price, q_amount))
}

/// `order_kind` -> venue time-in-force (§6), the same lookup-table shape
/// `map_venue_status` uses on the ingress side.
fn tif_for(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Limit => "Gtc",
        OrderKind::LimitMaker => "Alo",
        OrderKind::Market => "Ioc",
    }
}

/// Builds the venue-canonical order payload: `{asset, isBuy, limit_px, sz,
/// reduce_only, order_type: {limit: {tif}}, client_order_id}`. The caller
/// (C7's submission task) wraps this in the signing envelope.
pub fn build_order_payload(
    rule: &TradingRule,
    client_order_id: &str,
    side: Side,
    order_kind: OrderKind,
    position_action: PositionAction,
    price: Decimal,
    amount: Decimal,
) -> serde_json::Value {
    serde_json::json!({
        "asset": rule.asset_index,
        "isBuy": matches!(side, Side::Buy),
        "limit_px": price.to_string(),
        "sz": amount.to_string(),
        "reduce_only": matches!(position_action, PositionAction::Close),
        "order_type": { "limit": { "tif": tif_for(order_kind) } },
        "client_order_id": client_order_id,
    })
}

/// Builds the `{action, nonce, testnet}` signing envelope's `action` field
/// for a cancel request: `{"type":"cancel","asset":<idx>,"oid":<eid>}`.
pub fn build_cancel_payload(rule: &TradingRule, exchange_order_id: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "cancel",
        "asset": rule.asset_index,
        "oid": exchange_order_id.parse::<u64>().unwrap_or(0),
    })
}

/// Extracts the venue-assigned order id from a successful post response
/// shaped `{"resting":{"oid":"123"}}` or `{"filled":{"oid":"123",...}}`.
pub fn extract_exchange_order_id(response: &serde_json::Value) -> Option<String> {
    for key in ["resting", "filled"] {
        if let Some(oid) = response.get(key).and_then(|v| v.get("oid")) {
            return Some(match oid {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string().trim_matches('"').to_string(),
            });
        }
    }
    None
}

/// Extracts a venue-reported error string from a post response shaped
/// `{"error":"..."}`.
pub fn extract_error(response: &serde_json::Value) -> Option<String> {
    response
        .get("error")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rule() -> TradingRule {
        TradingRule {
            asset_index: 0,
            tick_size: dec!(1),
            lot_step: dec!(0.01),
            min_notional: dec!(10),
        }
    }

    #[test]
    fn quantize_rounds_down_to_lot_step() {
        let (p, a) = quantize(&rule(), dec!(50000.7), dec!(0.104)).unwrap();
        assert_eq!(p, dec!(50000));
        assert_eq!(a, dec!(0.10));
    }

    #[test]
    fn quantize_rejects_amount_rounding_to_zero() {
        let err = quantize(&rule(), dec!(50000), dec!(0.004)).unwrap_err();
        assert!(err.to_string().contains("zero"));
    }

    #[test]
    fn quantize_rejects_below_min_notional() {
        let tiny_rule = TradingRule {
            min_notional: dec!(100_000),
            ..rule()
        };
        let err = quantize(&tiny_rule, dec!(50000), dec!(0.10)).unwrap_err();
        assert!(err.to_string().contains("below minimum"));
    }

    #[test]
    fn market_order_allows_zero_price_through_quantize() {
        let (p, a) = quantize(&rule(), dec!(0), dec!(0.10)).unwrap();
        assert_eq!(p, dec!(0));
        assert_eq!(a, dec!(0.10));
    }

    #[test]
    fn tif_mapping_matches_spec_table() {
        assert_eq!(tif_for(OrderKind::Limit), "Gtc");
        assert_eq!(tif_for(OrderKind::LimitMaker), "Alo");
        assert_eq!(tif_for(OrderKind::Market), "Ioc");
    }

    #[test]
    fn extracts_exchange_order_id_from_resting_response() {
        let response = serde_json::json!({"resting": {"oid": "123"}});
        assert_eq!(extract_exchange_order_id(&response).as_deref(), Some("123"));
    }

    #[test]
    fn extracts_error_string() {
        let response = serde_json::json!({"error": "BadAloPxRejected"});
        assert_eq!(extract_error(&response).as_deref(), Some("BadAloPxRejected"));
    }
}
