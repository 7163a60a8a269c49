//! Wire frame shapes (§6 "Transport wire frames").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"method":"post","id":<u64>,"request":{"type":"<T>","payload":<...>}}`
#[derive(Debug, Clone, Serialize)]
pub struct PostRequestFrame {
    pub method: &'static str,
    pub id: u64,
    pub request: PostRequestBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostRequestBody {
    #[serde(rename = "type")]
    pub request_type: String,
    pub payload: Value,
}

impl PostRequestFrame {
    pub fn new(id: u64, request_type: impl Into<String>, payload: Value) -> Self {
        Self {
            method: "post",
            id,
            request: PostRequestBody {
                request_type: request_type.into(),
                payload,
            },
        }
    }
}

/// `{"method":"subscribe","subscription":{"type":"<chan>", ...}}`
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeFrame {
    pub method: &'static str,
    pub subscription: Value,
}

impl SubscribeFrame {
    pub fn new(subscription: Value) -> Self {
        Self {
            method: "subscribe",
            subscription,
        }
    }
}

/// `{"method":"ping"}`
#[derive(Debug, Clone, Serialize)]
pub struct PingFrame {
    pub method: &'static str,
}

impl Default for PingFrame {
    fn default() -> Self {
        Self { method: "ping" }
    }
}

/// An enqueued outbound unit of work, serialized to JSON text by the writer
/// thread (§4.3 "tagged union {Post, Subscribe, Ping}").
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Post(PostRequestFrame),
    Subscribe(SubscribeFrame),
    Ping,
}

impl OutboundFrame {
    pub fn to_json_text(&self) -> serde_json::Result<String> {
        match self {
            OutboundFrame::Post(f) => serde_json::to_string(f),
            OutboundFrame::Subscribe(f) => serde_json::to_string(f),
            OutboundFrame::Ping => serde_json::to_string(&PingFrame::default()),
        }
    }
}

/// Any inbound frame, parsed generically by `channel` discriminant before
/// being dispatched (post-response correlation vs. channel push vs. pong).
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub channel: String,
    #[serde(default)]
    pub data: Value,
}

/// The `data` object of a `channel: "post"` inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct PostResponseData {
    pub id: u64,
    pub response: Value,
}
