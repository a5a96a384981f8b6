//! Request/response bridge
//!
//! Turns one HTTP request into one bus request on a route's namespace, waits
//! for the aggregation window to close and maps what came back onto an HTTP
//! response. Every response carries the `x-msb-correlation-id` header.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Query, Request};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http2bus_core::{BusRoute, MessageBus, RequestMessage, RequestPayload, ResponseMessage};
use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregate::{collect, AggregationBudget, DEFAULT_WAIT_FOR_RESPONSES_MS};
use crate::error::ApiError;
use crate::pattern::PathParams;

/// Response header carrying the request's correlation id
pub const CORRELATION_HEADER: &str = "x-msb-correlation-id";

/// Request header with comma-separated tags
pub const TAGS_HEADER: &str = "x-msb-tags";

/// Query parameter with comma-separated tags
pub const TAGS_QUERY: &str = "_x-msb-tags";

/// Default request body limit (1 MiB)
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Gateway-wide bridge settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Response window for routes that do not set `waitForResponsesMs`
    pub default_wait_for_responses_ms: u64,
    /// Largest request body accepted, in bytes
    pub body_limit: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            default_wait_for_responses_ms: DEFAULT_WAIT_FOR_RESPONSES_MS,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Handler state for one bus route
#[derive(Clone)]
pub struct RouteBridge {
    route: Arc<BusRoute>,
    bus: Arc<dyn MessageBus>,
    budget: AggregationBudget,
    body_limit: usize,
}

impl RouteBridge {
    pub fn new(route: BusRoute, bus: Arc<dyn MessageBus>, options: BridgeOptions) -> Self {
        let budget = AggregationBudget::for_route(&route.bus, options.default_wait_for_responses_ms);
        Self {
            route: Arc::new(route),
            bus,
            budget,
            body_limit: options.body_limit,
        }
    }

    pub fn route(&self) -> &BusRoute {
        &self.route
    }

    /// Handle one request end to end
    pub async fn handle(&self, request: Request) -> Response {
        let message = RequestMessage::new(RequestPayload::default());
        let correlation_id = message.correlation_id.clone();

        let mut response = match self.exchange(message, request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        };

        match HeaderValue::from_str(&correlation_id) {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(CORRELATION_HEADER), value);
            }
            Err(e) => warn!(error = %e, "Correlation id is not a valid header value"),
        }
        response
    }

    async fn exchange(
        &self,
        mut message: RequestMessage,
        request: Request,
    ) -> Result<Response, ApiError> {
        let (parts, body) = request.into_parts();
        let bytes = to_bytes(body, self.body_limit)
            .await
            .map_err(|e| ApiError::PayloadTooLarge(e.to_string()))?;

        let query = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();

        let explicit = parts
            .headers
            .get(TAGS_HEADER)
            .and_then(|v| v.to_str().ok());
        message.tags = compute_tags(
            &message.correlation_id,
            explicit,
            query.get(TAGS_QUERY).map(String::as_str),
            self.route.bus.tags(),
        );

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let (body, body_buffer) = encode_body(content_type, &bytes);

        let url = parts
            .uri
            .path_and_query()
            .map_or(parts.uri.path(), |pq| pq.as_str());

        message.payload = RequestPayload {
            method: parts.method.as_str().to_lowercase(),
            url: strip_base_path(self.route.http.base_path(), url),
            headers: flatten_headers(&parts.headers),
            params: parts
                .extensions
                .get::<PathParams>()
                .map(|p| p.0.clone())
                .unwrap_or_default(),
            query,
            body,
            body_buffer,
        };

        let namespace = &self.route.bus.namespace;
        debug!(
            namespace = %namespace,
            correlation_id = %message.correlation_id,
            url = %message.payload.url,
            "Publishing request"
        );
        let events = self.bus.publish(namespace, message).await?;
        let responses = collect(events, &self.budget).await;

        self.build_response(responses)
    }

    fn build_response(&self, mut responses: Vec<ResponseMessage>) -> Result<Response, ApiError> {
        let Some(last) = responses.pop() else {
            let status = if self.budget.wait_for_responses == 0 {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            return Ok(status.into_response());
        };
        let payload = last.payload;

        let status = match payload.status_code {
            Some(code) => StatusCode::from_u16(code)
                .map_err(|_| ApiError::BadGateway(format!("Invalid response status {code}")))?,
            None => StatusCode::OK,
        };

        let mut headers = HeaderMap::new();
        if let Some(values) = &payload.headers {
            for (name, value) in values {
                self.append_header(&mut headers, name, value);
            }
        }

        let body = if let Some(encoded) = &payload.body_buffer {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| ApiError::BadGateway(format!("Invalid bodyBuffer: {e}")))?;
            default_content_type(&mut headers, "application/octet-stream");
            Body::from(bytes)
        } else {
            match payload.body {
                None | Some(Value::Null) => {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                    Body::empty()
                }
                Some(Value::String(text)) => Body::from(text),
                Some(value) => {
                    let encoded = serde_json::to_vec(&value)
                        .map_err(|e| ApiError::Internal(e.to_string()))?;
                    default_content_type(&mut headers, "application/json");
                    Body::from(encoded)
                }
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        response.headers_mut().extend(headers);
        Ok(response)
    }

    fn append_header(&self, headers: &mut HeaderMap, name: &str, value: &Value) {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!(header = %name, "Skipping invalid response header name");
            return;
        };
        if header_name == header::CONTENT_LENGTH || header_name == header::TRANSFER_ENCODING {
            debug!(header = %name, "Dropping framing header from bus response");
            return;
        }

        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        for value in values {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    warn!(header = %name, "Skipping non-scalar response header value");
                    continue;
                }
            };
            let text = if header_name == header::LOCATION {
                rewrite_location(self.route.http.base_path(), text)
            } else {
                text
            };
            match HeaderValue::from_str(&text) {
                Ok(value) => {
                    headers.append(header_name.clone(), value);
                }
                Err(_) => warn!(header = %name, "Skipping invalid response header value"),
            }
        }
    }
}

/// Build a request's tag list
///
/// Explicit tags (header first, then query) are de-duplicated by first
/// occurrence, configured tags are appended when not already present, and the
/// correlation id always leads.
pub fn compute_tags(
    correlation_id: &str,
    header: Option<&str>,
    query: Option<&str>,
    configured: &[String],
) -> Vec<String> {
    let mut tags = vec![correlation_id.to_string()];
    let explicit = [header, query]
        .into_iter()
        .flatten()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|tag| !tag.is_empty());
    let configured = configured.iter().map(String::as_str);

    for tag in explicit.chain(configured) {
        if !tags[1..].iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Remove a base path from the front of a URL
///
/// Plain string prefix removal, so `/apiv2` loses `/api` and becomes `/v2`.
/// The result always starts with `/`.
pub fn strip_base_path(base_path: &str, url: &str) -> String {
    match url.strip_prefix(base_path) {
        Some(rest) if !base_path.is_empty() => {
            if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{rest}")
            }
        }
        _ => url.to_string(),
    }
}

/// Encode a request body for the bus as `(body, bodyBuffer)`
pub fn encode_body(content_type: Option<&str>, bytes: &[u8]) -> (Option<Value>, Option<String>) {
    if bytes.is_empty() {
        return (None, None);
    }

    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    if let Some(mime) = &mime {
        if mime == "application/json" || mime.ends_with("+json") {
            if let Ok(value) = serde_json::from_slice(bytes) {
                return (Some(value), None);
            }
            debug!("Malformed JSON body, forwarding as text");
            return text_or_binary(bytes);
        }
    }

    let textual = match mime.as_deref() {
        None => true,
        Some(mime) => {
            mime.starts_with("text/")
                || mime == "application/text"
                || mime == "application/x-www-form-urlencoded"
                || mime == "application/xml"
                || mime.ends_with("+xml")
        }
    };

    if textual {
        text_or_binary(bytes)
    } else {
        (None, Some(BASE64.encode(bytes)))
    }
}

fn text_or_binary(bytes: &[u8]) -> (Option<Value>, Option<String>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (Some(Value::String(text.to_string())), None),
        Err(_) => (None, Some(BASE64.encode(bytes))),
    }
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

fn default_content_type(headers: &mut HeaderMap, content_type: &'static str) {
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

fn rewrite_location(base_path: &str, location: String) -> String {
    if !base_path.is_empty() && location.starts_with('/') {
        format!("{base_path}{location}")
    } else {
        location
    }
}
