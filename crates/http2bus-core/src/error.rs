//! Common error types for route validation and bus access

use thiserror::Error;

/// Result type for message-bus operations
pub type BusResult<T> = Result<T, BusError>;

/// A route list failed validation
///
/// Validation is all-or-nothing: a load that returns one of these has not
/// applied any part of the rejected list.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The route list is not an array
    #[error("Route list must be an array")]
    NotAnArray,

    /// An entry could not be decoded into a route
    #[error("Invalid route at index {index}: {message}")]
    InvalidEntry { index: usize, message: String },

    /// Bus namespace does not match the hierarchical namespace pattern
    #[error("Invalid namespace at index {index}: {namespace:?}")]
    InvalidNamespace { index: usize, namespace: String },

    /// Provider name does not match the provider name pattern
    #[error("Invalid provider name at index {index}: {name:?}")]
    InvalidProviderName { index: usize, name: String },
}

/// Errors raised by a message-bus implementation
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus cannot be reached
    #[error("Message bus unavailable: {0}")]
    Unavailable(String),

    /// The bus refused the operation
    #[error("Message bus rejected request: {0}")]
    Rejected(String),

    /// Unsubscribe for an id the bus does not know about
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    /// A payload could not be encoded for the wire
    #[error("Failed to encode message: {0}")]
    Encode(String),
}
