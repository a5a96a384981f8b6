//! Messages exchanged with bus responders

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outbound request published on a route's namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    /// Matches responses to this request; also surfaced to the HTTP client
    pub correlation_id: String,
    /// Ordered tag list, correlation id first
    pub tags: Vec<String>,
    pub payload: RequestPayload,
}

impl RequestMessage {
    /// New request with a freshly generated correlation id and no tags
    pub fn new(payload: RequestPayload) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            tags: Vec::new(),
            payload,
        }
    }
}

/// HTTP request as carried on the bus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Lower-case HTTP method
    pub method: String,
    /// Request path and query with the route's base path removed
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// JSON value or raw text; null for binary or empty bodies
    #[serde(default)]
    pub body: Option<Value>,
    /// Base64 of a binary body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_buffer: Option<String>,
}

/// Inbound response correlated to a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub payload: ResponsePayload,
}

impl From<ResponsePayload> for ResponseMessage {
    fn from(payload: ResponsePayload) -> Self {
        Self {
            correlation_id: None,
            payload,
        }
    }
}

/// HTTP response as produced by a responder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Absent or null means 200
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub body_buffer: Option<String>,
}

impl ResponsePayload {
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers
            .get_or_insert_with(serde_json::Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn body_buffer(mut self, encoded: impl Into<String>) -> Self {
        self.body_buffer = Some(encoded.into());
        self
    }
}

/// Acknowledgement from a responder that it is working on a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Extends the response deadline to this many ms after publish
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Responses this responder intends to send
    #[serde(default)]
    pub responses_remaining: Option<u32>,
}

/// Event delivered for an in-flight request
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Ack(Ack),
    Response(ResponseMessage),
}
