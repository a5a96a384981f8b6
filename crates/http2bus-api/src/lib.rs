//! http2bus-api - HTTP surface of the http2bus gateway
//!
//! This crate turns route lists into a live HTTP handler. A [`RouteComposer`]
//! owns the active dispatch tree; each bus route is served by a
//! [`RouteBridge`] that publishes the request on the bus and maps the
//! collected responses back onto HTTP. Provider routes mount a
//! [`RoutesProvider`], which follows a remote application's route documents.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use http2bus_api::{create_router, BridgeOptions, RouteComposer};
//! use http2bus_core::MemoryBus;
//!
//! let composer = Arc::new(RouteComposer::new(Arc::new(MemoryBus::new()), BridgeOptions::default()));
//! composer.load(&routes)?;
//! let router = create_router(composer);
//! ```

pub mod aggregate;
pub mod bridge;
pub mod cors;
pub mod error;
pub mod pattern;
pub mod provider;
pub mod router;

pub use aggregate::AggregationBudget;
pub use bridge::{BridgeOptions, RouteBridge, CORRELATION_HEADER};
pub use error::{ApiError, ProviderError, RouteError};
pub use pattern::{PathParams, PathPattern};
pub use provider::RoutesProvider;
pub use router::{ComposerService, Dispatch, DispatchTree, RouteComposer};

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the gateway router serving every route of `composer`
pub fn create_router(composer: Arc<RouteComposer>) -> Router {
    Router::new()
        .fallback_service(ComposerService::new(composer))
        .layer(TraceLayer::new_for_http())
}
