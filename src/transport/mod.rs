//! Backend transport: wire protocol and the WebSocket connection

pub mod connection;
pub mod protocol;

pub use connection::{ConnectionManager, ConnectionState};
pub use protocol::{ControlCommand, InboundMessage, OutboundMessage};

use thiserror::Error;

/// Errors from the transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("no url to reconnect to")]
    NoUrl,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound side of the connection, as seen by the router
pub trait MessageSink: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Send a message this crate has no typed form for
    fn send_raw(&self, message: &serde_json::Value) -> Result<(), TransportError>;
}
