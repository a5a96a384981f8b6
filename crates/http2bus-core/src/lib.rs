//! http2bus-core - Core types for the HTTP-to-message-bus gateway
//!
//! This crate provides the pieces every other http2bus crate builds on:
//!
//! - the route model ([`Route`]), a closed two-variant type resolved once at
//!   load time (provider delegation or bus route)
//! - schema validation for route lists ([`schema`])
//! - the bus message types exchanged with responders ([`message`])
//! - the [`MessageBus`] abstraction and an in-process implementation
//!   ([`MemoryBus`]) used for demos and tests

pub mod bus;
pub mod error;
pub mod memory;
pub mod message;
pub mod route;
pub mod schema;

pub use bus::{MessageBus, Subscription};
pub use error::{BusError, BusResult, SchemaError};
pub use memory::{IncomingRequest, MemoryBus};
pub use message::{Ack, BusEvent, RequestMessage, RequestPayload, ResponseMessage, ResponsePayload};
pub use route::{
    BusConfig, BusRoute, CorsConfig, HttpConfig, HttpMethod, OneOrMany, ProviderConfig,
    ProviderRoute, Route,
};
