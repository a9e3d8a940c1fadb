//! ---
//! wamp_section: "02-messaging-wire-protocol"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "WAMP message schema and protocol codec."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Largest identifier allowed by the protocol (2^53, exactly representable in IEEE doubles).
pub const MAX_ID: u64 = 1 << 53;

/// Dictionary carried in `details`, `options` and `extra` positions.
pub type Details = serde_json::Map<String, JsonValue>;

macro_rules! wamp_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw identifier.
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Raw identifier value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

wamp_id!(
    /// Session identifier assigned by the broker in WELCOME.
    SessionId
);
wamp_id!(
    /// Client-generated correlation identifier for requests.
    RequestId
);
wamp_id!(
    /// Broker-assigned identifier of a confirmed subscription.
    SubscriptionId
);
wamp_id!(
    /// Broker-assigned identifier of a single publication.
    PublicationId
);

/// Message type codes understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `[1, realm, details]`
    Hello,
    /// `[2, session, details]`
    Welcome,
    /// `[3, details, reason]`
    Abort,
    /// `[4, authmethod, extra]`
    Challenge,
    /// `[5, signature, extra]`
    Authenticate,
    /// `[6, details, reason]`
    Goodbye,
    /// `[32, request, options, topic]`
    Subscribe,
    /// `[33, request, subscription]`
    Subscribed,
    /// `[36, subscription, publication, details, args?, kwargs?]`
    Event,
}

impl MessageKind {
    /// Integer code placed at index 0 of the message array.
    pub const fn code(self) -> u64 {
        match self {
            MessageKind::Hello => 1,
            MessageKind::Welcome => 2,
            MessageKind::Abort => 3,
            MessageKind::Challenge => 4,
            MessageKind::Authenticate => 5,
            MessageKind::Goodbye => 6,
            MessageKind::Subscribe => 32,
            MessageKind::Subscribed => 33,
            MessageKind::Event => 36,
        }
    }

    /// Resolve a type code, returning `None` for codes outside the supported set.
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(MessageKind::Hello),
            2 => Some(MessageKind::Welcome),
            3 => Some(MessageKind::Abort),
            4 => Some(MessageKind::Challenge),
            5 => Some(MessageKind::Authenticate),
            6 => Some(MessageKind::Goodbye),
            32 => Some(MessageKind::Subscribe),
            33 => Some(MessageKind::Subscribed),
            36 => Some(MessageKind::Event),
            _ => None,
        }
    }

    /// Upper-case protocol name, used in logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Hello => "HELLO",
            MessageKind::Welcome => "WELCOME",
            MessageKind::Abort => "ABORT",
            MessageKind::Challenge => "CHALLENGE",
            MessageKind::Authenticate => "AUTHENTICATE",
            MessageKind::Goodbye => "GOODBYE",
            MessageKind::Subscribe => "SUBSCRIBE",
            MessageKind::Subscribed => "SUBSCRIBED",
            MessageKind::Event => "EVENT",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded protocol message.
///
/// Inbound frames with a type code outside [`MessageKind`] decode to
/// [`WampMessage::Unknown`] so the session layer can ignore them explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum WampMessage {
    /// Realm join request sent by the client once the transport opens.
    Hello {
        /// Realm to join.
        realm: String,
        /// Announced authentication methods and roles.
        details: Details,
    },
    /// Session established by the broker.
    Welcome {
        /// Session identifier.
        session: SessionId,
        /// Broker roles and session metadata.
        details: Details,
    },
    /// Broker refused the session before it was established.
    Abort {
        /// Free-form details, usually a `message`.
        details: Details,
        /// Reason URI.
        reason: String,
    },
    /// Broker requests proof of identity.
    Challenge {
        /// Authentication method selected by the broker.
        auth_method: String,
        /// Method specific parameters.
        extra: Details,
    },
    /// Client response to a challenge.
    Authenticate {
        /// Signature or token.
        signature: String,
        /// Method specific parameters.
        extra: Details,
    },
    /// Session close handshake.
    Goodbye {
        /// Free-form details.
        details: Details,
        /// Reason URI.
        reason: String,
    },
    /// Subscription request.
    Subscribe {
        /// Correlation identifier.
        request: RequestId,
        /// Subscription options.
        options: Details,
        /// Topic URI.
        topic: String,
    },
    /// Subscription confirmation.
    Subscribed {
        /// Correlation identifier of the originating SUBSCRIBE.
        request: RequestId,
        /// Broker-assigned subscription identifier.
        subscription: SubscriptionId,
    },
    /// Publication delivered to a subscription.
    Event {
        /// Subscription the event belongs to.
        subscription: SubscriptionId,
        /// Publication identifier.
        publication: PublicationId,
        /// Publication details.
        details: Details,
        /// Positional payload, absent when the publisher sent none.
        args: Option<Vec<JsonValue>>,
        /// Keyword payload, absent when the publisher sent none.
        kwargs: Option<Details>,
    },
    /// Any message whose type code this client does not handle.
    Unknown {
        /// Raw type code.
        code: u64,
        /// Remaining fields after the type code.
        fields: Vec<JsonValue>,
    },
}

impl WampMessage {
    /// The message kind, or `None` for [`WampMessage::Unknown`].
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            WampMessage::Hello { .. } => Some(MessageKind::Hello),
            WampMessage::Welcome { .. } => Some(MessageKind::Welcome),
            WampMessage::Abort { .. } => Some(MessageKind::Abort),
            WampMessage::Challenge { .. } => Some(MessageKind::Challenge),
            WampMessage::Authenticate { .. } => Some(MessageKind::Authenticate),
            WampMessage::Goodbye { .. } => Some(MessageKind::Goodbye),
            WampMessage::Subscribe { .. } => Some(MessageKind::Subscribe),
            WampMessage::Subscribed { .. } => Some(MessageKind::Subscribed),
            WampMessage::Event { .. } => Some(MessageKind::Event),
            WampMessage::Unknown { .. } => None,
        }
    }

    /// Integer type code, including the raw code of unknown messages.
    pub fn code(&self) -> u64 {
        match self {
            WampMessage::Unknown { code, .. } => *code,
            other => other.kind().map(MessageKind::code).unwrap_or_default(),
        }
    }

    /// Name used in log output.
    pub fn name(&self) -> &'static str {
        self.kind().map(MessageKind::as_str).unwrap_or("UNKNOWN")
    }

    /// Convenience constructor for a subscription request with empty options.
    pub fn subscribe(request: RequestId, topic: impl Into<String>) -> Self {
        WampMessage::Subscribe {
            request,
            options: Details::new(),
            topic: topic.into(),
        }
    }

    /// Convenience constructor for a GOODBYE with empty details.
    pub fn goodbye(reason: impl Into<String>) -> Self {
        WampMessage::Goodbye {
            details: Details::new(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for an AUTHENTICATE with empty extra.
    pub fn authenticate(signature: impl Into<String>) -> Self {
        WampMessage::Authenticate {
            signature: signature.into(),
            extra: Details::new(),
        }
    }
}
