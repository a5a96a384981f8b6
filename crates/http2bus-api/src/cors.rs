//! Per-route CORS

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use http2bus_core::CorsConfig;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};
use tracing::warn;

const DEFAULT_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::PATCH,
    Method::POST,
    Method::DELETE,
];

/// Build the CORS layer for a route
///
/// Without a config every origin is allowed, the default method set is
/// advertised and requested headers are mirrored back. With credentials
/// enabled a wildcard origin, method or header list is answered by
/// mirroring the request instead of `*`.
pub fn cors_layer(config: Option<&CorsConfig>) -> CorsLayer {
    let default = CorsConfig::default();
    let config = config.unwrap_or(&default);
    let credentials = config.credentials.unwrap_or(false);

    let origins = config
        .origin
        .as_ref()
        .map(|o| o.to_vec())
        .unwrap_or_default();
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        if credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        }
    } else {
        AllowOrigin::list(parse_values::<HeaderValue>("origin", &origins))
    };

    let allow_methods = match &config.methods {
        Some(methods) if is_wildcard(&methods.to_vec()) => {
            if credentials {
                AllowMethods::mirror_request()
            } else {
                AllowMethods::any()
            }
        }
        Some(methods) => AllowMethods::list(
            methods
                .to_vec()
                .iter()
                .filter_map(|m| match Method::from_bytes(m.to_uppercase().as_bytes()) {
                    Ok(method) => Some(method),
                    Err(_) => {
                        warn!(method = %m, "Skipping invalid CORS method");
                        None
                    }
                }),
        ),
        None => AllowMethods::list(DEFAULT_METHODS),
    };

    let allow_headers = match &config.allowed_headers {
        Some(headers) if is_wildcard(&headers.to_vec()) => {
            if credentials {
                AllowHeaders::mirror_request()
            } else {
                AllowHeaders::any()
            }
        }
        Some(headers) => AllowHeaders::list(parse_values::<HeaderName>("header", &headers.to_vec())),
        None => AllowHeaders::mirror_request(),
    };

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(allow_methods)
        .allow_headers(allow_headers)
        .allow_credentials(credentials);

    if let Some(exposed) = &config.exposed_headers {
        let exposed = exposed.to_vec();
        if !is_wildcard(&exposed) {
            layer = layer.expose_headers(ExposeHeaders::list(parse_values::<HeaderName>(
                "header", &exposed,
            )));
        } else if credentials {
            // A credentialed response cannot expose `*`; only the named headers survive
            let named: Vec<String> = exposed.into_iter().filter(|h| h != "*").collect();
            warn!("Ignoring wildcard exposed header on a route with credentials");
            layer = layer.expose_headers(ExposeHeaders::list(parse_values::<HeaderName>(
                "header", &named,
            )));
        } else {
            layer = layer.expose_headers(ExposeHeaders::any());
        }
    }
    if let Some(max_age) = config.max_age {
        layer = layer.max_age(Duration::from_secs(max_age));
    }
    layer
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}

fn parse_values<T: std::str::FromStr>(kind: &str, values: &[String]) -> Vec<T> {
    values
        .iter()
        .filter_map(|value| match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(kind, value = %value, "Skipping invalid CORS value");
                None
            }
        })
        .collect()
}
