//! Route model
//!
//! A route entry is either a provider delegation (mount a nested, separately
//! published route set under a path) or a bus route (translate matching HTTP
//! requests into bus requests on a namespace). Which one is decided once, when
//! the entry is decoded, by which of the `provider` / `bus` keys is present.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of responses a bus route waits for
pub const DEFAULT_WAIT_FOR_RESPONSES: i64 = 1;

/// One entry of a routing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRoute", into = "RawRoute")]
pub enum Route {
    /// Delegate everything under a path to a nested route set
    Provider(ProviderRoute),
    /// Bridge matching requests onto a bus namespace
    Bus(BusRoute),
}

impl Route {
    /// HTTP side of the route, common to both variants
    pub fn http(&self) -> &HttpConfig {
        match self {
            Route::Provider(route) => &route.http,
            Route::Bus(route) => &route.http,
        }
    }
}

/// Provider delegation entry
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    pub provider: ProviderConfig,
    pub http: HttpConfig,
}

/// Bus route entry
#[derive(Debug, Clone, PartialEq)]
pub struct BusRoute {
    pub bus: BusConfig,
    pub http: HttpConfig,
}

impl BusRoute {
    /// Configured methods, `GET` when none are given
    pub fn methods(&self) -> Vec<HttpMethod> {
        match &self.http.methods {
            Some(methods) if !methods.is_empty() => methods.clone(),
            _ => vec![HttpMethod::Get],
        }
    }

    /// Number of responses to wait for before the window may close
    pub fn wait_for_responses(&self) -> i64 {
        self.bus
            .wait_for_responses
            .unwrap_or(DEFAULT_WAIT_FOR_RESPONSES)
    }
}

/// Identity of a nested route set
///
/// Compared structurally: two provider routes with equal configs share one
/// live provider across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
}

/// Bus side of a bus route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BusConfig {
    /// Hierarchical, colon-delimited destination (e.g. `example:users`)
    pub namespace: String,
    /// Responses to collect; negative means "until the timeout"
    #[serde(
        default,
        deserialize_with = "number::signed",
        skip_serializing_if = "Option::is_none"
    )]
    pub wait_for_responses: Option<i64>,
    #[serde(
        default,
        deserialize_with = "number::unsigned",
        skip_serializing_if = "Option::is_none"
    )]
    pub wait_for_responses_ms: Option<u64>,
    #[serde(
        default,
        deserialize_with = "number::unsigned",
        skip_serializing_if = "Option::is_none"
    )]
    pub wait_for_acks_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl BusConfig {
    /// Bus config for a namespace with every budget left at its default
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            wait_for_responses: None,
            wait_for_responses_ms: None,
            wait_for_acks_ms: None,
            tags: None,
        }
    }

    /// Add a tag unless it is already present
    pub fn insert_tag(&mut self, tag: &str) {
        let tags = self.tags.get_or_insert_with(Vec::new);
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    /// Configured tags, empty when none are set
    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }
}

/// HTTP side of a route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<HttpMethod>>,
    /// Accept every method on this path with a single handler
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsConfig>,
}

impl HttpConfig {
    /// `basePath + path`, either of which may be absent
    pub fn full_path(&self) -> String {
        format!(
            "{}{}",
            self.base_path.as_deref().unwrap_or(""),
            self.path.as_deref().unwrap_or("")
        )
    }

    /// Configured base path, empty when absent
    pub fn base_path(&self) -> &str {
        self.base_path.as_deref().unwrap_or("")
    }
}

/// Methods a bus route may be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[serde(alias = "HEAD")]
    Head,
    #[serde(alias = "GET")]
    Get,
    #[serde(alias = "PUT")]
    Put,
    #[serde(alias = "POST")]
    Post,
    #[serde(alias = "DELETE")]
    Delete,
    #[serde(alias = "OPTIONS")]
    Options,
}

impl HttpMethod {
    /// Upper-case method token as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Head => "HEAD",
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

/// Per-route CORS settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    /// Allowed origins; `*` or absent allows any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<OneOrMany>,
    /// Allowed request headers; absent mirrors the preflight request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_headers: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_headers: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<bool>,
    /// Preflight cache lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
}

/// A single string or a list of strings (`"GET,POST"` or `["GET", "POST"]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Flatten into individual values, splitting single strings on commas
    pub fn to_vec(&self) -> Vec<String> {
        let values: Vec<&str> = match self {
            OneOrMany::One(value) => value.split(',').collect(),
            OneOrMany::Many(values) => values.iter().map(String::as_str).collect(),
        };
        values
            .into_iter()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Shape errors for a single entry, before any field-level validation
#[derive(Debug, Error)]
pub enum RouteShapeError {
    #[error("route must have exactly one of `provider` or `bus`, found both")]
    Ambiguous,
    #[error("route must have exactly one of `provider` or `bus`, found neither")]
    Missing,
}

/// Wire form of a route entry
#[derive(Serialize, Deserialize)]
struct RawRoute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bus: Option<BusConfig>,
    http: HttpConfig,
}

impl TryFrom<RawRoute> for Route {
    type Error = RouteShapeError;

    fn try_from(raw: RawRoute) -> Result<Self, Self::Error> {
        match (raw.provider, raw.bus) {
            (Some(provider), None) => Ok(Route::Provider(ProviderRoute {
                provider,
                http: raw.http,
            })),
            (None, Some(bus)) => Ok(Route::Bus(BusRoute { bus, http: raw.http })),
            (Some(_), Some(_)) => Err(RouteShapeError::Ambiguous),
            (None, None) => Err(RouteShapeError::Missing),
        }
    }
}

impl From<Route> for RawRoute {
    fn from(route: Route) -> Self {
        match route {
            Route::Provider(route) => RawRoute {
                provider: Some(route.provider),
                bus: None,
                http: route.http,
            },
            Route::Bus(route) => RawRoute {
                provider: None,
                bus: Some(route.bus),
                http: route.http,
            },
        }
    }
}

/// Budget fields accept any JSON number; fractions are truncated toward zero
mod number {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn signed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|value| {
                if value.is_finite() {
                    Ok(value.trunc() as i64)
                } else {
                    Err(D::Error::custom(format!("{value} is not a finite number")))
                }
            })
            .transpose()
    }

    pub fn unsigned<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|value| {
                if value.is_finite() && value >= 0.0 {
                    Ok(value.trunc() as u64)
                } else {
                    Err(D::Error::custom(format!("{value} is not a non-negative number")))
                }
            })
            .transpose()
    }
}
