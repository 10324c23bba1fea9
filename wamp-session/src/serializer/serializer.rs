use anyhow::{
    Error,
    Result,
};

use crate::message::{
    incoming::IncomingMessage,
    outgoing::OutgoingMessage,
};

/// A wire format for WAMP messages, negotiated as a transport sub-protocol.
///
/// Does not implement message batching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SerializerType {
    /// JavaScript Object Notation, carried in text frames.
    Json,
    /// MessagePack, carried in binary frames.
    MessagePack,
}

impl SerializerType {
    /// The sub-protocol name used during transport negotiation.
    pub fn protocol(&self) -> &'static str {
        match self {
            Self::Json => "wamp.2.json",
            Self::MessagePack => "wamp.2.msgpack",
        }
    }

    /// Whether serialized messages are binary, rather than text.
    pub fn binary(&self) -> bool {
        *self == Self::MessagePack
    }

    pub fn encode(&self, message: &OutgoingMessage) -> Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(message).map_err(Error::new),
            Self::MessagePack => rmp_serde::to_vec(message).map_err(Error::new),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<IncomingMessage> {
        match self {
            Self::Json => serde_json::from_slice(bytes).map_err(Error::new),
            Self::MessagePack => rmp_serde::from_slice(bytes).map_err(Error::new),
        }
    }
}

impl TryFrom<&str> for SerializerType {
    type Error = &'static str;
    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "wamp.2.json" => Ok(Self::Json),
            "wamp.2.msgpack" => Ok(Self::MessagePack),
            _ => Err("unsupported serializer"),
        }
    }
}
