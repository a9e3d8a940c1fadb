//! ---
//! wamp_section: "04-session-core"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Session protocol state machine and async runtime."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
//! Client side of a WAMP v2 publish/subscribe session.
//!
//! [`WampClient`] is a synchronous state machine fed with transport events.
//! [`SessionRuntime`] owns one client inside a tokio task, runs the
//! authentication callback off the event loop and hands out a cloneable
//! [`SessionHandle`].

pub mod client;
pub mod queue;
pub mod reconnect;
pub mod registry;
pub mod runtime;
pub mod session;

use r_wamp_msg::MessagingError;
use r_wamp_transport::TransportError;

/// Shared result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error("a transport is already active for this client")]
    AlreadyConnected,
    #[error("request identifier space exhausted")]
    RequestIdsExhausted,
    #[error("session terminated before it was established")]
    Terminated,
    #[error("session is shutting down after a local disconnect")]
    Disconnecting,
    #[error("session runtime has stopped")]
    RuntimeStopped,
}

pub use client::{ChallengeRequest, ConnectHandler, MessageOutcome, WampClient};
pub use queue::{OutboundQueue, QueuedFrame};
pub use reconnect::{ReconnectCounter, ReconnectDecision, ReconnectPolicy};
pub use registry::{
    ConfirmOutcome, Event, EventHandler, Subscription, SubscriptionRegistry, SubscriptionStatus,
};
pub use runtime::{
    Authenticator, SessionHandle, SessionRuntime, SessionStatus, StaticTokenAuthenticator,
};
pub use session::{SessionConfig, SessionState};
