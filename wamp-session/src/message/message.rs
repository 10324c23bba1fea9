use serde::{
    Deserialize,
    Serialize,
};
use serde_struct_tuple::{
    DeserializeStructTuple,
    SerializeStructTuple,
};

use crate::core::{
    id::Id,
    types::{
        Dictionary,
        Integer,
        List,
    },
    uri::Uri,
};

/// The kind of request an ERROR message answers.
///
/// Encoded on the wire as the type code of the original request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Publish,
    Subscribe,
    Call,
    Register,
    Invocation,
    /// A request this client never issues, such as UNSUBSCRIBE.
    Unknown(Integer),
}

impl RequestKind {
    pub fn code(&self) -> Integer {
        match self {
            Self::Publish => 16,
            Self::Subscribe => 32,
            Self::Call => 48,
            Self::Register => 64,
            Self::Invocation => 68,
            Self::Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Publish => "PUBLISH",
            Self::Subscribe => "SUBSCRIBE",
            Self::Call => "CALL",
            Self::Register => "REGISTER",
            Self::Invocation => "INVOCATION",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<Integer> for RequestKind {
    fn from(value: Integer) -> Self {
        match value {
            16 => Self::Publish,
            32 => Self::Subscribe,
            48 => Self::Call,
            64 => Self::Register,
            68 => Self::Invocation,
            code => Self::Unknown(code),
        }
    }
}

impl Serialize for RequestKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.code())
    }
}

impl<'de> Deserialize<'de> for RequestKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Integer::deserialize(deserializer).map(Self::from)
    }
}

// Session establishment and teardown.

/// Asks the router to attach the session to a realm.
///
/// WAMP requires the details dictionary, even when empty.
#[derive(Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple)]
pub struct HelloMessage {
    pub realm: Uri,
    pub details: Dictionary,
}

/// The router accepted the session into the realm.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeStructTuple)]
pub struct WelcomeMessage {
    pub session: Id,
    #[serde_struct_tuple(default)]
    pub details: Dictionary,
}

/// Ends the session immediately, without a reply.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple,
)]
pub struct AbortMessage {
    pub details: Dictionary,
    pub reason: Uri,
    #[serde_struct_tuple(default, skip_serializing_if = List::is_empty)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// Ends the session. The receiving side answers with its own GOODBYE.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple,
)]
pub struct GoodbyeMessage {
    pub details: Dictionary,
    pub reason: Uri,
}

/// A failed request.
///
/// The client receives these for its own requests and sends them to fail an invocation.
#[derive(Debug, Clone, PartialEq, Eq, SerializeStructTuple, DeserializeStructTuple)]
pub struct ErrorMessage {
    pub request_kind: RequestKind,
    pub request: Id,
    pub details: Dictionary,
    pub error: Uri,
    #[serde_struct_tuple(default, skip_serializing_if = List::is_empty)]
    pub arguments: List,
    #[serde_struct_tuple(default, skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

// Publish and subscribe.

#[derive(Debug, Clone, PartialEq, Eq, SerializeStructTuple)]
pub struct PublishMessage {
    pub request: Id,
    pub options: Dictionary,
    pub topic: Uri,
    #[serde_struct_tuple(skip_serializing_if = List::is_empty)]
    pub arguments: List,
    #[serde_struct_tuple(skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

/// Acknowledges a PUBLISH sent with `acknowledge: true`.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeStructTuple)]
pub struct PublishedMessage {
    pub request: Id,
    pub publication: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, SerializeStructTuple)]
pub struct SubscribeMessage {
    pub request: Id,
    pub options: Dictionary,
    pub topic: Uri,
}

#[derive(Debug, Clone, PartialEq, Eq, DeserializeStructTuple)]
pub struct SubscribedMessage {
    pub request: Id,
    pub subscription: Id,
}

/// A publication delivered to one of the session's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeStructTuple)]
pub struct EventMessage {
    pub subscription: Id,
    pub publication: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default)]
    pub arguments: List,
    #[serde_struct_tuple(default)]
    pub arguments_keyword: Dictionary,
}

// Remote procedure calls.

#[derive(Debug, Clone, PartialEq, Eq, SerializeStructTuple)]
pub struct CallMessage {
    pub request: Id,
    pub options: Dictionary,
    pub procedure: Uri,
    #[serde_struct_tuple(skip_serializing_if = List::is_empty)]
    pub arguments: List,
    #[serde_struct_tuple(skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}

#[derive(Debug, Clone, PartialEq, Eq, DeserializeStructTuple)]
pub struct ResultMessage {
    pub request: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default)]
    pub arguments: List,
    #[serde_struct_tuple(default)]
    pub arguments_keyword: Dictionary,
}

#[derive(Debug, Clone, PartialEq, Eq, SerializeStructTuple)]
pub struct RegisterMessage {
    pub request: Id,
    pub options: Dictionary,
    pub procedure: Uri,
}

#[derive(Debug, Clone, PartialEq, Eq, DeserializeStructTuple)]
pub struct RegisteredMessage {
    pub request: Id,
    pub registration: Id,
}

/// A call routed to one of the session's registrations.
///
/// `request` is allocated by the router and is echoed back in the YIELD or ERROR reply.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeStructTuple)]
pub struct InvocationMessage {
    pub request: Id,
    pub registration: Id,
    pub details: Dictionary,
    #[serde_struct_tuple(default)]
    pub arguments: List,
    #[serde_struct_tuple(default)]
    pub arguments_keyword: Dictionary,
}

#[derive(Debug, Clone, PartialEq, Eq, SerializeStructTuple)]
pub struct YieldMessage {
    pub request: Id,
    pub options: Dictionary,
    #[serde_struct_tuple(skip_serializing_if = List::is_empty)]
    pub arguments: List,
    #[serde_struct_tuple(skip_serializing_if = Dictionary::is_empty)]
    pub arguments_keyword: Dictionary,
}
