//! Connector configuration.
//!
//! Loading the config file itself is out of scope (delegated to the
//! embedding process); this module only defines and defaults the typed
//! shape, the way `HuginnConfig`/`ExecutionConfig` did for the teacher's
//! strategy engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_post_timeout_ms() -> u64 {
    5_000
}

fn default_heartbeat_ping_after_ms() -> u64 {
    20_000
}

fn default_heartbeat_stale_after_ms() -> u64 {
    45_000
}

fn default_handshake_timeout_ms() -> u64 {
    8_000
}

/// Off by default (0) on this venue: see the `max_not_found_retries` field
/// doc comment and `DESIGN.md` (Open Question 2).
fn default_max_not_found_retries() -> u32 {
    0
}

fn default_auto_cleanup_terminal_orders() -> bool {
    true
}

fn default_client_order_id_prefix() -> String {
    "LS".to_string()
}

fn default_event_topic_prefix() -> String {
    "orders.hyperliquid".to_string()
}

fn default_signer_args() -> Vec<String> {
    Vec::new()
}

/// Per-pair quantization rule, the serde-friendly mirror of
/// `venue::TradingRule` — kept separate so `venue.rs` stays free of `serde`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingRuleConfig {
    pub asset_index: u32,
    pub tick_size: rust_decimal::Decimal,
    pub lot_step: rust_decimal::Decimal,
    pub min_notional: rust_decimal::Decimal,
}

/// Recognized configuration options (§6). Every field here is read by at
/// least one component; there are no unused knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub venue_ws_url: String,
    #[serde(default)]
    pub testnet: bool,

    #[serde(default = "default_post_timeout_ms")]
    pub post_timeout_ms: u64,

    #[serde(default = "default_heartbeat_ping_after_ms")]
    pub heartbeat_ping_after_ms: u64,

    #[serde(default = "default_heartbeat_stale_after_ms")]
    pub heartbeat_stale_after_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Off by default on this venue (spec §9 Open Question 2): the
    /// not-found retry counter is only consulted if a caller opts in by
    /// setting this above zero; see `OrderTracker::process_order_not_found`.
    #[serde(default = "default_max_not_found_retries")]
    pub max_not_found_retries: u32,

    #[serde(default = "default_auto_cleanup_terminal_orders")]
    pub auto_cleanup_terminal_orders: bool,

    #[serde(default = "default_client_order_id_prefix")]
    pub client_order_id_prefix: String,

    pub event_bus_endpoint: String,

    #[serde(default = "default_event_topic_prefix")]
    pub event_topic_prefix: String,

    /// Path to the out-of-process signer binary (§4.4/§6).
    pub signer_command: String,

    #[serde(default = "default_signer_args")]
    pub signer_args: Vec<String>,

    /// Per-pair quantization rules, normally seeded from the venue's `meta`
    /// endpoint at startup (out of scope here, §1); a config-driven seed is
    /// enough for a connector that only trades a fixed pair set.
    #[serde(default)]
    pub trading_rules: HashMap<String, TradingRuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venue_ws_url: "wss://api.hyperliquid.xyz/ws".to_string(),
            testnet: false,
            post_timeout_ms: default_post_timeout_ms(),
            heartbeat_ping_after_ms: default_heartbeat_ping_after_ms(),
            heartbeat_stale_after_ms: default_heartbeat_stale_after_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_not_found_retries: default_max_not_found_retries(),
            auto_cleanup_terminal_orders: default_auto_cleanup_terminal_orders(),
            client_order_id_prefix: default_client_order_id_prefix(),
            event_bus_endpoint: String::new(),
            event_topic_prefix: default_event_topic_prefix(),
            signer_command: String::new(),
            signer_args: default_signer_args(),
            trading_rules: HashMap::new(),
        }
    }
}
