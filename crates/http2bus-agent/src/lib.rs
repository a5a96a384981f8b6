//! http2bus-agent - Route documents for distributed discovery
//!
//! An application that contributes routes to a composing gateway owns a
//! [`RoutesAgent`]. The agent keeps a [`RouteDocument`] (its current route
//! set, tagged with the application name and stamped with a version hash) and
//! broadcasts it so gateways mounting the application as a provider can pick
//! up changes.
//!
//! ```text
//!  application                      bus                       gateway
//!  ┌────────────┐  announce / heartbeat  ┌──────────────────────────────┐
//!  │ RoutesAgent│ ─────────────────────► │ RoutesProvider ─► composer   │
//!  └────────────┘                        └──────────────────────────────┘
//! ```

mod agent;
mod document;
mod error;

pub use agent::{AgentConfig, HeartbeatHandle, RoutesAgent};
pub use document::{version_hash, RouteDocument};
pub use error::AgentError;

/// Namespace a document is broadcast on whenever it changes
pub const ROUTES_ANNOUNCE_NAMESPACE: &str = "_http2bus:routes:announce";

/// Namespace a document is re-sent on periodically
pub const ROUTES_HEARTBEAT_NAMESPACE: &str = "_http2bus:routes:heartbeat";
