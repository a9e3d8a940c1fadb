//! ---
//! wamp_section: "02-messaging-wire-protocol"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Transport adapters carrying text frames for the session layer."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
//! Transport adapter contract.
//!
//! A [`Connector`] opens a [`Transport`] towards an address and returns
//! immediately. Everything that happens afterwards (open, inbound frames,
//! errors, close) is reported asynchronously as [`TransportEvent`]s tagged
//! with the [`ConnectionId`] of the transport that produced them.
#![warn(missing_docs)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod memory;
pub mod websocket;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by transport adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport has already been closed.
    #[error("transport is closed")]
    Closed,
    /// The address could not be turned into a connection request.
    #[error("invalid transport address {url}: {reason}")]
    InvalidAddress {
        /// Offending address.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// The adapter needs a tokio runtime to spawn its connection task.
    #[error("no async runtime available to drive the transport")]
    NoRuntime,
    /// The connector refused to open a new transport.
    #[error("failed to open transport: {0}")]
    OpenFailed(String),
}

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one opened transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Notification raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// The socket is connected and frames may be sent.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The socket reported an error. Informational only; a `Close` follows
    /// whenever the error ends the connection.
    Error(String),
    /// The socket is gone. Emitted exactly once per transport.
    Close,
}

/// Notification tagged with the transport that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Transport the event belongs to.
    pub connection: ConnectionId,
    /// What happened.
    pub kind: TransportEventKind,
}

impl TransportEvent {
    /// Construct an event for `connection`.
    pub fn new(connection: ConnectionId, kind: TransportEventKind) -> Self {
        Self { connection, kind }
    }
}

/// Handle to one opened socket.
pub trait Transport: Send {
    /// Identifier shared with every event this transport emits.
    fn id(&self) -> ConnectionId;
    /// Queue a text frame for transmission.
    fn send(&mut self, frame: String) -> Result<()>;
    /// Close the socket. A `Close` event follows once the socket is gone.
    fn close(&mut self);
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// Factory opening transports towards an address.
pub trait Connector: Send {
    /// Start opening a transport. Returns before the socket is connected.
    fn open(&mut self, url: &str, protocols: &[&str]) -> Result<Box<dyn Transport>>;
}

pub use memory::{ConnectionRecord, MemoryConnector, MemoryTransport};
pub use websocket::{WebSocketConnector, WebSocketTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let first = ConnectionId::next();
        let second = ConnectionId::next();
        assert_ne!(first, second);
        assert!(second.get() > first.get());
        assert!(first.to_string().starts_with("conn-"));
    }
}
