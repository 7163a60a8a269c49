//! hl-connector-core — Hyperliquid trading connector core.
//!
//! A single crate providing the order-lifecycle machinery a higher-level
//! strategy or bot process embeds: client order id minting, a race-free
//! order state tracker, a websocket post/subscribe client correlating
//! requests to responses, an out-of-process signer bridge, a user-stream
//! ingestor translating venue pushes into tracker updates, and an event
//! publisher fanning lifecycle transitions out to in-process listeners and
//! an external bus. [`connector::ConnectorFacade`] wires all of the above
//! into the single entry point embedders are expected to use.
//!
//! ## Modules
//! - [`error`]: `ConnectorError` and the wire-level `ReasonCode` taxonomy
//! - [`logging`]: `tracing` subscriber setup
//! - [`config`]: typed, serde-deserialized connector configuration
//! - [`metrics`]: Prometheus metrics registry
//! - [`ids`]: client order id generation, `Side`/`OrderKind`/`PositionAction`/`Liquidity`
//! - [`reason`]: venue error string -> `ReasonCode` normalization
//! - [`order`]: `OrderState`, `InFlightOrder`, `OrderUpdate`, `TradeUpdate`
//! - [`tracker`]: `OrderTracker`, the single source of truth for order state
//! - [`transport`]: `PostClient`, the websocket post/subscribe correlation layer
//! - [`signer`]: `SignerBridge`, out-of-process request signing
//! - [`user_stream`]: `UserStreamIngestor`, venue push -> tracker update translation
//! - [`events`]: `EventPublisher`, in-process + bus event fanout
//! - [`venue`]: Hyperliquid payload construction and quantization rules
//! - [`connector`]: `ConnectorFacade`, the public entry point

pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod order;
pub mod reason;
pub mod signer;
pub mod tracker;
pub mod transport;
pub mod user_stream;
pub mod venue;

pub use config::Config;
pub use connector::{CancelHandle, ConnectorFacade, OrderParams};
pub use error::{ConnectorError, ReasonCode};
pub use events::{BusPublisher, EventKind, EventListener, EventPublisher, NullBusPublisher};
pub use ids::{OrderKind, PositionAction, Side};
pub use metrics::ConnectorMetrics;
pub use order::{InFlightOrder, OrderState};
pub use signer::SignerBridge;
pub use tracker::OrderTracker;
pub use transport::PostClient;
pub use venue::{TradingRule, TradingRules};

/// Convenient imports for embedders wiring up a `ConnectorFacade`.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::connector::{CancelHandle, ConnectorFacade, OrderParams};
    pub use crate::error::{ConnectorError, ReasonCode};
    pub use crate::events::{BusPublisher, EventKind, EventListener, EventPublisher, NullBusPublisher};
    pub use crate::ids::{OrderKind, PositionAction, Side};
    pub use crate::metrics::ConnectorMetrics;
    pub use crate::order::{InFlightOrder, OrderState};
    pub use crate::signer::SignerBridge;
    pub use crate::tracker::OrderTracker;
    pub use crate::transport::PostClient;
    pub use crate::venue::{TradingRule, TradingRules};
}
