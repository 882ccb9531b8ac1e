//! Envelope - the `{type, payload}` wrapper for every socket frame.
//!
//! Frames travel as JSON text. [`Envelope`] is the untyped outer layer;
//! [`ClientFrame`] and [`ServerFrame`] are the closed sets of frames each
//! side may send, with payload shapes checked on decode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{FrameError, Message, UserPresence, UserStatus};

/// Frame type discriminators as they appear in the `type` field.
pub mod kind {
    /// Client → server: subscribe to a channel's pushes.
    pub const SUBSCRIBE_CHANNEL: &str = "subscribe_channel";
    /// Client → server: broadcast own status.
    pub const STATUS_CHANGE: &str = "status_change";
    /// Client → server: keepalive.
    pub const PING: &str = "ping";
    /// Server → client: one user's status changed.
    pub const STATUS_UPDATE: &str = "status_update";
    /// Server → client: a message was posted to a channel.
    pub const CHANNEL_MESSAGE: &str = "channel_message";
    /// Server → client: snapshot of known users.
    pub const USERS_LIST: &str = "users_list";
    /// Server → client: subscription confirmed.
    pub const SUBSCRIBED: &str = "subscribed";
    /// Server → client: greeting after the socket is accepted.
    pub const CONNECTED: &str = "connected";
    /// Server → client: keepalive reply.
    pub const PONG: &str = "pong";
}

/// The untyped wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload; `null` when the frame carries none.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parse an envelope from a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Malformed)
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    fn payload_as<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| {
            FrameError::InvalidPayload {
                kind: self.kind.clone(),
                source,
            }
        })
    }
}

#[derive(Serialize, Deserialize)]
struct StatusPayload {
    status: UserStatus,
}

#[derive(Serialize, Deserialize)]
struct ChannelMessagePayload {
    channel: String,
    message: Message,
}

#[derive(Serialize, Deserialize)]
struct SubscribedPayload {
    channel: String,
}

#[derive(Serialize, Deserialize)]
struct ConnectedPayload {
    #[serde(default)]
    message: String,
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Ask the server to push messages of this channel.
    SubscribeChannel {
        /// Channel name.
        channel: String,
    },
    /// Announce own status change.
    StatusChange {
        /// New status.
        status: UserStatus,
    },
    /// Keepalive.
    Ping,
}

impl ClientFrame {
    /// The `type` discriminator of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubscribeChannel { .. } => kind::SUBSCRIBE_CHANNEL,
            Self::StatusChange { .. } => kind::STATUS_CHANGE,
            Self::Ping => kind::PING,
        }
    }

    /// Wrap into an envelope.
    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            // The channel name is sent bare, not as an object.
            Self::SubscribeChannel { channel } => Value::String(channel.clone()),
            Self::StatusChange { status } => {
                serde_json::json!({ "status": status.as_str() })
            }
            Self::Ping => Value::Null,
        };
        Envelope::new(self.kind(), payload)
    }

    /// Encode to a text frame.
    pub fn encode(&self) -> Result<String, FrameError> {
        self.to_envelope().to_text()
    }

    /// Decode a client frame (used by test servers).
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let envelope = Envelope::parse(text)?;
        match envelope.kind.as_str() {
            kind::SUBSCRIBE_CHANNEL => Ok(Self::SubscribeChannel {
                channel: envelope.payload_as()?,
            }),
            kind::STATUS_CHANGE => {
                let payload: StatusPayload = envelope.payload_as()?;
                Ok(Self::StatusChange {
                    status: payload.status,
                })
            }
            kind::PING => Ok(Self::Ping),
            _ => Err(FrameError::UnexpectedKind(envelope.kind)),
        }
    }
}

/// Frames the server sends.
///
/// Decoding never fails on an unrecognized `type`; such frames become
/// [`ServerFrame::Unknown`] so newer servers stay compatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// A single user's status changed.
    StatusUpdate(UserPresence),
    /// A message was posted to a channel.
    ChannelMessage {
        /// Channel the message was posted to.
        channel: String,
        /// The message.
        message: Message,
    },
    /// Snapshot of users and their statuses.
    UsersList(Vec<UserPresence>),
    /// Subscription confirmed.
    Subscribed {
        /// Channel name.
        channel: String,
    },
    /// Greeting after the socket was accepted.
    Connected {
        /// Human-readable greeting.
        message: String,
    },
    /// Keepalive reply.
    Pong,
    /// A frame type this client does not know.
    Unknown {
        /// The unrecognized `type` value.
        kind: String,
    },
}

impl ServerFrame {
    /// Decode a text frame.
    ///
    /// Returns an error for text that is not an envelope, or for a known
    /// `type` whose payload has the wrong shape.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let envelope = Envelope::parse(text)?;
        Self::from_envelope(envelope)
    }

    /// Type an already parsed envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, FrameError> {
        let frame = match envelope.kind.as_str() {
            kind::STATUS_UPDATE => Self::StatusUpdate(envelope.payload_as()?),
            kind::CHANNEL_MESSAGE => {
                let payload: ChannelMessagePayload = envelope.payload_as()?;
                Self::ChannelMessage {
                    channel: payload.channel,
                    message: payload.message,
                }
            }
            kind::USERS_LIST => Self::UsersList(envelope.payload_as()?),
            kind::SUBSCRIBED => {
                let payload: SubscribedPayload = envelope.payload_as()?;
                Self::Subscribed {
                    channel: payload.channel,
                }
            }
            kind::CONNECTED => {
                let payload: ConnectedPayload = envelope.payload_as()?;
                Self::Connected {
                    message: payload.message,
                }
            }
            kind::PONG => Self::Pong,
            _ => Self::Unknown {
                kind: envelope.kind,
            },
        };
        Ok(frame)
    }

    /// The `type` discriminator of this frame.
    pub fn kind(&self) -> &str {
        match self {
            Self::StatusUpdate(_) => kind::STATUS_UPDATE,
            Self::ChannelMessage { .. } => kind::CHANNEL_MESSAGE,
            Self::UsersList(_) => kind::USERS_LIST,
            Self::Subscribed { .. } => kind::SUBSCRIBED,
            Self::Connected { .. } => kind::CONNECTED,
            Self::Pong => kind::PONG,
            Self::Unknown { kind } => kind,
        }
    }

    /// Encode to a text frame (used by test servers).
    pub fn encode(&self) -> Result<String, FrameError> {
        let payload = match self {
            Self::StatusUpdate(presence) => to_value(presence)?,
            Self::ChannelMessage { channel, message } => to_value(&ChannelMessagePayload {
                channel: channel.clone(),
                message: message.clone(),
            })?,
            Self::UsersList(users) => to_value(users)?,
            Self::Subscribed { channel } => to_value(&SubscribedPayload {
                channel: channel.clone(),
            })?,
            Self::Connected { message } => to_value(&ConnectedPayload {
                message: message.clone(),
            })?,
            Self::Pong | Self::Unknown { .. } => Value::Null,
        };
        Envelope::new(self.kind(), payload).to_text()
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, FrameError> {
    serde_json::to_value(value).map_err(FrameError::Encode)
}
