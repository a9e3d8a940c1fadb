//! ---
//! wamp_section: "02-messaging-wire-protocol"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "WAMP message schema and protocol codec."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
//! JSON text codec for WAMP messages.
//!
//! Every message travels as a JSON array whose first element is the integer
//! type code. Encoding and decoding are pure functions; the session layer owns
//! all state.

use serde_json::Value as JsonValue;

use crate::types::{Details, MessageKind, WampMessage, MAX_ID};
use crate::{MessagingError, Result};

/// WebSocket sub-protocol negotiated for the JSON serializer.
pub const JSON_SUBPROTOCOL: &str = "wamp.2.json";

/// Encode a message into a text frame.
pub fn encode(message: &WampMessage) -> Result<String> {
    Ok(serde_json::to_string(&message.to_fields())?)
}

/// Decode a text frame into a message.
///
/// Type codes outside the supported set decode to [`WampMessage::Unknown`];
/// only frames that are not a message array at all, or known messages with
/// malformed fields, produce an error.
pub fn decode(frame: &str) -> Result<WampMessage> {
    let value: JsonValue = serde_json::from_str(frame)?;
    let JsonValue::Array(fields) = value else {
        return Err(MessagingError::Malformed("frame is not a JSON array"));
    };
    WampMessage::from_fields(fields)
}

impl WampMessage {
    /// Flatten the message into its ordered wire fields, type code first.
    pub fn to_fields(&self) -> Vec<JsonValue> {
        let code = JsonValue::from(self.code());
        match self {
            WampMessage::Hello { realm, details } => {
                vec![code, realm.as_str().into(), details.clone().into()]
            }
            WampMessage::Welcome { session, details } => {
                vec![code, session.get().into(), details.clone().into()]
            }
            WampMessage::Abort { details, reason } | WampMessage::Goodbye { details, reason } => {
                vec![code, details.clone().into(), reason.as_str().into()]
            }
            WampMessage::Challenge { auth_method, extra } => {
                vec![code, auth_method.as_str().into(), extra.clone().into()]
            }
            WampMessage::Authenticate { signature, extra } => {
                vec![code, signature.as_str().into(), extra.clone().into()]
            }
            WampMessage::Subscribe {
                request,
                options,
                topic,
            } => vec![
                code,
                request.get().into(),
                options.clone().into(),
                topic.as_str().into(),
            ],
            WampMessage::Subscribed {
                request,
                subscription,
            } => vec![code, request.get().into(), subscription.get().into()],
            WampMessage::Event {
                subscription,
                publication,
                details,
                args,
                kwargs,
            } => {
                let mut fields = vec![
                    code,
                    subscription.get().into(),
                    publication.get().into(),
                    details.clone().into(),
                ];
                // kwargs is positional, so an empty args list must precede it.
                match (args, kwargs) {
                    (Some(args), None) => fields.push(args.clone().into()),
                    (args, Some(kwargs)) => {
                        fields.push(args.clone().unwrap_or_default().into());
                        fields.push(kwargs.clone().into());
                    }
                    (None, None) => {}
                }
                fields
            }
            WampMessage::Unknown { fields, .. } => {
                let mut out = Vec::with_capacity(fields.len() + 1);
                out.push(code);
                out.extend(fields.iter().cloned());
                out
            }
        }
    }

    /// Rebuild a message from its ordered wire fields.
    pub fn from_fields(fields: Vec<JsonValue>) -> Result<Self> {
        let mut fields = fields.into_iter();
        let code = match fields.next() {
            Some(value) => value
                .as_u64()
                .ok_or(MessagingError::Malformed("message type is not an integer"))?,
            None => return Err(MessagingError::Malformed("empty message array")),
        };
        let Some(kind) = MessageKind::from_code(code) else {
            return Ok(WampMessage::Unknown {
                code,
                fields: fields.collect(),
            });
        };

        let mut reader = FieldReader {
            kind,
            fields,
            index: 0,
        };
        let message = match kind {
            MessageKind::Hello => WampMessage::Hello {
                realm: reader.string()?,
                details: reader.dict()?,
            },
            MessageKind::Welcome => WampMessage::Welcome {
                session: reader.id()?.into(),
                details: reader.dict()?,
            },
            MessageKind::Abort => WampMessage::Abort {
                details: reader.dict()?,
                reason: reader.string()?,
            },
            MessageKind::Challenge => WampMessage::Challenge {
                auth_method: reader.string()?,
                extra: reader.dict()?,
            },
            MessageKind::Authenticate => WampMessage::Authenticate {
                signature: reader.string()?,
                extra: reader.dict()?,
            },
            MessageKind::Goodbye => WampMessage::Goodbye {
                details: reader.dict()?,
                reason: reader.string()?,
            },
            MessageKind::Subscribe => WampMessage::Subscribe {
                request: reader.id()?.into(),
                options: reader.dict()?,
                topic: reader.string()?,
            },
            MessageKind::Subscribed => WampMessage::Subscribed {
                request: reader.id()?.into(),
                subscription: reader.id()?.into(),
            },
            MessageKind::Event => WampMessage::Event {
                subscription: reader.id()?.into(),
                publication: reader.id()?.into(),
                details: reader.dict()?,
                args: reader.optional_list()?,
                kwargs: reader.optional_dict()?,
            },
        };
        Ok(message)
    }
}

/// Sequential reader that tracks the field position for error reporting.
struct FieldReader {
    kind: MessageKind,
    fields: std::vec::IntoIter<JsonValue>,
    index: usize,
}

impl FieldReader {
    fn invalid(&self, expected: &'static str) -> MessagingError {
        MessagingError::InvalidField {
            kind: self.kind.as_str(),
            index: self.index,
            expected,
        }
    }

    fn next(&mut self, expected: &'static str) -> Result<JsonValue> {
        self.index += 1;
        match self.fields.next() {
            Some(value) => Ok(value),
            None => Err(self.invalid(expected)),
        }
    }

    fn id(&mut self) -> Result<u64> {
        const EXPECTED: &str = "an identifier between 0 and 2^53";
        match self.next(EXPECTED)?.as_u64() {
            Some(id) if id <= MAX_ID => Ok(id),
            _ => Err(self.invalid(EXPECTED)),
        }
    }

    fn string(&mut self) -> Result<String> {
        match self.next("a string")? {
            JsonValue::String(value) => Ok(value),
            _ => Err(self.invalid("a string")),
        }
    }

    fn dict(&mut self) -> Result<Details> {
        match self.next("a dictionary")? {
            JsonValue::Object(map) => Ok(map),
            _ => Err(self.invalid("a dictionary")),
        }
    }

    fn optional_list(&mut self) -> Result<Option<Vec<JsonValue>>> {
        self.index += 1;
        match self.fields.next() {
            None => Ok(None),
            Some(JsonValue::Array(items)) => Ok(Some(items)),
            Some(_) => Err(self.invalid("a list")),
        }
    }

    fn optional_dict(&mut self) -> Result<Option<Details>> {
        self.index += 1;
        match self.fields.next() {
            None => Ok(None),
            Some(JsonValue::Object(map)) => Ok(Some(map)),
            Some(_) => Err(self.invalid("a dictionary")),
        }
    }
}
