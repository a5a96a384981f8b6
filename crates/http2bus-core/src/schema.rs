//! Route list validation
//!
//! A route list is accepted only if every entry decodes into a [`Route`] and
//! passes the field patterns below. Callers apply a list only after
//! [`validate_routes`] succeeds, so a rejected list never partially applies.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::SchemaError;
use crate::route::Route;

/// Hierarchical bus namespace, optionally private (`_` prefix)
static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^_?([a-z0-9\-]+:)+([a-z0-9\-]+)$").expect("invalid namespace pattern")
});

/// Provider name; unanchored, so any name containing one valid character passes
static PROVIDER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9\-]+").expect("invalid provider name pattern"));

/// Check whether a namespace is a valid bus destination
pub fn is_valid_namespace(namespace: &str) -> bool {
    NAMESPACE.is_match(namespace)
}

/// Decode and validate a JSON route list
pub fn parse_routes(value: &Value) -> Result<Vec<Route>, SchemaError> {
    let entries = value.as_array().ok_or(SchemaError::NotAnArray)?;

    let routes = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value::<Route>(entry.clone()).map_err(|e| {
                SchemaError::InvalidEntry {
                    index,
                    message: e.to_string(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    validate_routes(&routes)?;
    Ok(routes)
}

/// Validate already-decoded routes against the field patterns
pub fn validate_routes(routes: &[Route]) -> Result<(), SchemaError> {
    for (index, route) in routes.iter().enumerate() {
        match route {
            Route::Provider(route) => {
                if !PROVIDER_NAME.is_match(&route.provider.name) {
                    return Err(SchemaError::InvalidProviderName {
                        index,
                        name: route.provider.name.clone(),
                    });
                }
            }
            Route::Bus(route) => {
                if !is_valid_namespace(&route.bus.namespace) {
                    return Err(SchemaError::InvalidNamespace {
                        index,
                        namespace: route.bus.namespace.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}
