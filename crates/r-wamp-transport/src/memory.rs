//! ---
//! wamp_section: "02-messaging-wire-protocol"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Transport adapters carrying text frames for the session layer."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{ConnectionId, Connector, Result, Transport, TransportError};

/// Everything observed on one in-memory transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Identifier handed to the session layer.
    pub id: ConnectionId,
    /// Address the transport was opened with.
    pub url: String,
    /// Sub-protocols requested on open.
    pub protocols: Vec<String>,
    /// Frames sent, in order.
    pub sent: Vec<String>,
    /// Whether `close` was called.
    pub closed: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    connections: Vec<ConnectionRecord>,
    failing_opens: usize,
}

/// Connector that records traffic instead of touching the network.
///
/// Clones share state, so a test can keep one handle while the session owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    /// Create an empty connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `open` fail synchronously.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().failing_opens = count;
    }

    /// Number of transports opened so far.
    pub fn open_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Snapshot of every connection record.
    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.state.lock().connections.clone()
    }

    /// Snapshot of the most recently opened connection.
    pub fn last(&self) -> Option<ConnectionRecord> {
        self.state.lock().connections.last().cloned()
    }

    /// Frames sent on the connection opened `index`-th (zero based).
    pub fn sent(&self, index: usize) -> Vec<String> {
        self.state
            .lock()
            .connections
            .get(index)
            .map(|record| record.sent.clone())
            .unwrap_or_default()
    }
}

impl Connector for MemoryConnector {
    fn open(&mut self, url: &str, protocols: &[&str]) -> Result<Box<dyn Transport>> {
        let mut guard = self.state.lock();
        if guard.failing_opens > 0 {
            guard.failing_opens -= 1;
            return Err(TransportError::OpenFailed(format!("refused {url}")));
        }
        let id = ConnectionId::next();
        guard.connections.push(ConnectionRecord {
            id,
            url: url.to_owned(),
            protocols: protocols.iter().map(|p| (*p).to_owned()).collect(),
            sent: Vec::new(),
            closed: false,
        });
        let index = guard.connections.len() - 1;
        Ok(Box::new(MemoryTransport {
            id,
            index,
            state: self.state.clone(),
        }))
    }
}

/// Transport half handed out by [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryTransport {
    id: ConnectionId,
    index: usize,
    state: Arc<Mutex<MemoryState>>,
}

impl Transport for MemoryTransport {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&mut self, frame: String) -> Result<()> {
        let mut guard = self.state.lock();
        let record = guard
            .connections
            .get_mut(self.index)
            .ok_or(TransportError::Closed)?;
        if record.closed {
            return Err(TransportError::Closed);
        }
        record.sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(record) = self.state.lock().connections.get_mut(self.index) {
            record.closed = true;
        }
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
