//! Crate-wide error type.
//!
//! Device capabilities, dispatch, and peer requests all fail with the
//! same `Error` so that a failure can cross a link as plain message
//! text (`err` field) and be rebuilt as `Error::Remote` on the far
//! side.

use crate::config::ConfigError;
use crate::protocol::{ConnId, ProtocolError};
use crate::transport::TransportError;
use thiserror::Error;

/// Errors surfaced by node operations, device capabilities, dispatch,
/// and peer sessions.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid device id '{raw}': {reason}")]
    InvalidId { raw: String, reason: String },

    #[error("Device '{0}' is not connected")]
    NotConnected(String),

    #[error("Already registered: '{0}'")]
    AlreadyRegistered(String),

    #[error("Device '{0}' is not registered")]
    NotRegistered(String),

    #[error("Unknown device: '{0}'")]
    UnknownDevice(String),

    #[error("unknown connection '{0}'")]
    UnknownConnection(ConnId),

    #[error("no gateway for domain '{0}'")]
    NoGateway(String),

    #[error("gateway already registered for domain '{0}'")]
    GatewayExists(String),

    #[error("proxy for '{0}' is not attached to this node")]
    UnknownProxy(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("layer must invoke next or return a result")]
    LayerMustRespond,

    #[error("session closed")]
    SessionClosed,

    /// Failure text carried back in a RESPONSE frame's `err` field.
    #[error("{0}")]
    Remote(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Message text as it travels in a RESPONSE `err` field.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}
