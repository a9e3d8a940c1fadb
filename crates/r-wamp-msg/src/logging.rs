//! ---
//! wamp_section: "02-messaging-wire-protocol"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "WAMP message schema and protocol codec."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use tracing::debug;

use crate::types::WampMessage;

/// Direction of the frame movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Frame written to the transport.
    Outbound,
    /// Frame buffered until the session is established.
    Queued,
    /// Frame read from the transport.
    Inbound,
}

impl FrameDirection {
    /// Lower-case label for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameDirection::Outbound => "outbound",
            FrameDirection::Queued => "queued",
            FrameDirection::Inbound => "inbound",
        }
    }
}

/// Emit a structured log entry for protocol traffic.
pub fn log_frame(direction: FrameDirection, message: &WampMessage) {
    debug!(
        code = message.code(),
        kind = message.name(),
        direction = direction.as_str(),
        "wamp frame"
    );
}
