//! ---
//! wamp_section: "02-messaging-wire-protocol"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "WAMP message schema and protocol codec."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod codec;
pub mod logging;
pub mod roles;
pub mod types;

/// Shared result type for codec operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised while encoding or decoding protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The frame was not valid JSON or could not be serialised.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame decoded, but is not a WAMP message array.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    /// A known message type carried a field of the wrong shape.
    #[error("{kind} field {index} is invalid: expected {expected}")]
    InvalidField {
        /// Message type whose field failed validation.
        kind: &'static str,
        /// Zero-based position in the message array (the type code is index 0).
        index: usize,
        /// Human readable description of the expected value.
        expected: &'static str,
    },
}

pub use codec::{decode, encode, JSON_SUBPROTOCOL};
pub use logging::{log_frame, FrameDirection};
pub use roles::{client_roles, hello_details, parse_roles, RoleFeatures};
pub use types::{
    Details, MessageKind, PublicationId, RequestId, SessionId, SubscriptionId, WampMessage,
    MAX_ID,
};
