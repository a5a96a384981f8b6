//! Agent errors

use http2bus_core::{BusError, SchemaError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Routes handed to `load` failed validation
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The document could not be broadcast
    #[error(transparent)]
    Bus(#[from] BusError),
}
