//! C1 — Identifiers & Enums.
//!
//! `generate_client_order_id` is lock-free on the fast path: a single
//! process-global `AtomicU64` fetch-and-increment, no mutex, no CAS retry
//! loop needed (fetch_add never fails). This is the same "process-wide
//! atomic state with a documented lifecycle" idiom the rate limiter uses
//! for its token count, generalized from a CAS loop (needed there because
//! refill competes with consumption) down to a plain fetch_add (there is no
//! competing writer here — every caller only ever increments).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static ORDER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates a fresh, process-unique client order id.
///
/// Format: `<prefix>-<epoch_ms>-<monotonic_u64>`. The prefix and timestamp
/// are cosmetic; uniqueness is guaranteed entirely by the monotonic suffix,
/// which is strictly increasing in call order within a process.
pub fn generate_client_order_id(prefix: &str) -> String {
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = ORDER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{epoch_ms}-{seq}")
}

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Order kind, mapped to the venue's time-in-force at submission time
/// (`order_bridge`-style translation, see `venue.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
    LimitMaker,
}

/// Whether an order opens, closes, or is indifferent to position direction.
/// Position/margin computation itself is out of scope; this tag is only
/// forwarded into the venue payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionAction {
    Nil,
    Open,
    Close,
}

/// Maker or taker, carried on a [`crate::order::TradeUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Liquidity {
    Maker,
    Taker,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let ids: Vec<String> = (0..1000).map(|_| generate_client_order_id("LS")).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn generated_ids_have_monotonic_suffix() {
        let a = generate_client_order_id("LS");
        let b = generate_client_order_id("LS");
        let suffix = |s: &str| -> u64 { s.rsplit('-').next().unwrap().parse().unwrap() };
        assert!(suffix(&b) > suffix(&a));
    }

    #[test]
    fn prefix_is_preserved() {
        let id = generate_client_order_id("HL");
        assert!(id.starts_with("HL-"));
    }
}
