//! API error types and conversions

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http2bus_core::{BusError, SchemaError};
use serde::Serialize;
use thiserror::Error;

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    /// 413 Payload Too Large
    PayloadTooLarge(String),
    /// 502 Bad Gateway (bus unreachable or unusable response)
    BadGateway(String),
    /// 500 Internal Server Error
    Internal(String),
}

/// Standard error response format
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg)
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        if status.is_server_error() {
            tracing::error!(error = error_type, %message, "API error");
        } else {
            tracing::debug!(error = error_type, %message, "API client error");
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<BusError> for ApiError {
    fn from(err: BusError) -> Self {
        ApiError::BadGateway(err.to_string())
    }
}

/// Failure to apply a route list to a composer
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A route path could not be compiled into a matcher
    #[error("Invalid route path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A provider could not attach to the bus
    #[error("Failed to start provider {name:?}: {source}")]
    Provider {
        name: String,
        #[source]
        source: BusError,
    },
}

/// A provider did not tear down cleanly
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider {0:?} already released")]
    AlreadyReleased(String),

    #[error("Failed to unsubscribe provider {name:?}: {source}")]
    Unsubscribe {
        name: String,
        #[source]
        source: BusError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_bus_error_maps_to_bad_gateway() {
        let response =
            ApiError::from(BusError::Unavailable("down".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "bad_gateway");
        assert!(json["message"].as_str().unwrap().contains("down"));
    }

    #[test]
    fn test_payload_too_large_status() {
        let response = ApiError::PayloadTooLarge("big".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[rstest::rstest]
    #[case(ApiError::PayloadTooLarge(String::new()), "payload_too_large")]
    #[case(ApiError::BadGateway(String::new()), "bad_gateway")]
    #[case(ApiError::Internal(String::new()), "internal_error")]
    #[tokio::test]
    async fn test_error_kind_in_body(#[case] err: ApiError, #[case] kind: &str) {
        let body = to_bytes(err.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], kind);
    }
}
