//! ---
//! wamp_section: "04-session-core"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Session protocol state machine and async runtime."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::collections::VecDeque;

use r_wamp_msg::{MessageKind, RequestId};

/// One pre-encoded frame waiting for an established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    pub frame: String,
    pub kind: Option<MessageKind>,
    /// Subscription request the frame carries, if any.
    pub request: Option<RequestId>,
}

/// FIFO buffer of encoded frames.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    frames: VecDeque<QueuedFrame>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, frame: QueuedFrame) {
        self.frames.push_back(frame);
    }

    /// Return a frame that could not be written so it goes out first next time.
    pub fn push_front(&mut self, frame: QueuedFrame) {
        self.frames.push_front(frame);
    }

    pub fn pop_front(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedFrame> {
        self.frames.iter()
    }
}
