//! Error taxonomy for the connector core.
//!
//! Two distinct vocabularies coexist deliberately:
//! - [`ConnectorError`] is the Rust-level error returned by fallible calls
//!   between components (tracker, transport, signer bridge).
//! - [`ReasonCode`] is the wire-level, closed-set vocabulary carried on
//!   `ORDER_FAILED` events and published to the external event bus; it is
//!   never matched against `ConnectorError` variants directly, it is
//!   produced by the reason mapper (see `reason.rs`).

use thiserror::Error;

/// Canonical reason taxonomy. Closed set; any unrecognized venue string
/// maps to `VenueReject` (see `reason::map_reason`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    Ok,
    InvalidParams,
    RiskBlocked,
    InsufficientBalance,
    PostOnlyViolation,
    MinSize,
    PriceOutOfBounds,
    RateLimited,
    NetworkError,
    Expired,
    VenueReject,
}

impl ReasonCode {
    /// The wire string for this reason, as published on events (§6).
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Ok => "ok",
            ReasonCode::InvalidParams => "invalid_params",
            ReasonCode::RiskBlocked => "risk_blocked",
            ReasonCode::InsufficientBalance => "insufficient_balance",
            ReasonCode::PostOnlyViolation => "post_only_violation",
            ReasonCode::MinSize => "min_size",
            ReasonCode::PriceOutOfBounds => "price_out_of_bounds",
            ReasonCode::RateLimited => "rate_limited",
            ReasonCode::NetworkError => "network_error",
            ReasonCode::Expired => "expired",
            ReasonCode::VenueReject => "venue_reject",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal fallible-operation error type, shared by C3/C4/C5.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("client order id {0} is already tracked")]
    DuplicateClientOrderId(String),

    #[error("unknown client order id {0}")]
    UnknownClientOrderId(String),

    #[error("exchange order id already set to {existing}, refusing to overwrite with {attempted}")]
    ExchangeOrderIdConflict { existing: String, attempted: String },

    #[error("illegal state transition {from:?} -> {to:?}")]
    IllegalTransition { from: String, to: String },

    #[error("transport is not connected")]
    NotConnected,

    #[error("post timed out after {0}ms")]
    PostTimeout(u64),

    #[error("signer bridge error: {0}")]
    SignerError(String),

    #[error("signer bridge nonce regressed: last {last}, requested {requested}")]
    NonceRegression { last: u64, requested: u64 },

    #[error("venue rejected order: {0}")]
    VenueReject(String),

    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectorError {
    /// Maps an internal error to the canonical wire reason carried on
    /// `ORDER_FAILED` events.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            ConnectorError::InvalidParams(_) => ReasonCode::InvalidParams,
            ConnectorError::PostTimeout(_) | ConnectorError::NotConnected => {
                ReasonCode::NetworkError
            }
            ConnectorError::SignerError(_) => ReasonCode::NetworkError,
            ConnectorError::VenueReject(_) => ReasonCode::VenueReject,
            ConnectorError::Io(_) | ConnectorError::Json(_) => ReasonCode::NetworkError,
            _ => ReasonCode::VenueReject,
        }
    }
}

pub type Result<T> = anyhow::Result<T>;
