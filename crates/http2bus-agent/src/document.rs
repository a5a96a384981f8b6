//! Versioned route documents

use chrono::{DateTime, Utc};
use http2bus_core::Route;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Snapshot of an application's routes, as broadcast for discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDocument {
    pub name: String,
    /// Lifetime of the document in milliseconds
    pub ttl: u64,
    pub updated_at: DateTime<Utc>,
    /// Change token; `None` until routes are loaded
    #[serde(default)]
    pub version_hash: Option<String>,
    #[serde(default)]
    pub routes: Option<Vec<Route>>,
}

impl RouteDocument {
    pub fn new(name: impl Into<String>, ttl: u64, updated_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            ttl,
            updated_at,
            version_hash: None,
            routes: None,
        }
    }

    /// Replace the route list and recompute the version hash
    pub fn set_routes(&mut self, routes: Vec<Route>) {
        self.version_hash = Some(version_hash(&self.updated_at, &routes, self.ttl));
        self.routes = Some(routes);
    }
}

/// Change token for a route set
///
/// Epoch milliseconds of `updated_at` followed by the hex SHA-256 of the
/// serialized routes and the ttl. Field order is fixed by the route types, so
/// identical inputs hash identically in every process. Not a security
/// property, only a cheap equality check for consumers.
pub fn version_hash(updated_at: &DateTime<Utc>, routes: &[Route], ttl: u64) -> String {
    // Route types contain no non-string map keys, so serialization cannot fail
    let serialized = serde_json::to_string(routes).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hasher.update(ttl.to_string().as_bytes());

    format!(
        "{}{}",
        updated_at.timestamp_millis(),
        hex::encode(hasher.finalize())
    )
}
