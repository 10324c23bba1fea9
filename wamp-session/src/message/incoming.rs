use serde_struct_tuple::DeserializeStructTuple;
use serde_struct_tuple_enum::DeserializeStructTupleEnum;

use crate::{
    core::{
        id::Id,
        types::Integer,
    },
    message::message::{
        AbortMessage,
        ErrorMessage,
        EventMessage,
        GoodbyeMessage,
        InvocationMessage,
        PublishedMessage,
        RegisteredMessage,
        ResultMessage,
        SubscribedMessage,
        WelcomeMessage,
    },
};

/// A message sent by the router to the client.
///
/// Message types a router never sends to a client fail to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, DeserializeStructTupleEnum)]
#[tag(Integer)]
pub enum IncomingMessage {
    #[tag = 2]
    Welcome(WelcomeMessage),
    #[tag = 3]
    Abort(AbortMessage),
    #[tag = 6]
    Goodbye(GoodbyeMessage),
    #[tag = 8]
    Error(ErrorMessage),
    #[tag = 17]
    Published(PublishedMessage),
    #[tag = 33]
    Subscribed(SubscribedMessage),
    #[tag = 36]
    Event(EventMessage),
    #[tag = 50]
    Result(ResultMessage),
    #[tag = 65]
    Registered(RegisteredMessage),
    #[tag = 68]
    Invocation(InvocationMessage),
}

impl IncomingMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "WELCOME",
            Self::Abort(_) => "ABORT",
            Self::Goodbye(_) => "GOODBYE",
            Self::Error(_) => "ERROR",
            Self::Published(_) => "PUBLISHED",
            Self::Subscribed(_) => "SUBSCRIBED",
            Self::Event(_) => "EVENT",
            Self::Result(_) => "RESULT",
            Self::Registered(_) => "REGISTERED",
            Self::Invocation(_) => "INVOCATION",
        }
    }

    /// The client request this message answers.
    pub fn answers(&self) -> Option<Id> {
        match self {
            Self::Error(message) => Some(message.request),
            Self::Published(message) => Some(message.request),
            Self::Subscribed(message) => Some(message.request),
            Self::Result(message) => Some(message.request),
            Self::Registered(message) => Some(message.request),
            _ => None,
        }
    }
}

#[cfg(test)]
mod incoming_test {
    use crate::{
        core::{
            id::Id,
            types::{
                Dictionary,
                List,
                Value,
            },
            uri::Uri,
        },
        message::{
            incoming::IncomingMessage,
            message::{
                ErrorMessage,
                EventMessage,
                InvocationMessage,
                RequestKind,
                WelcomeMessage,
            },
        },
    };

    fn decode(json: &str) -> Result<IncomingMessage, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn reads_welcome_with_details() {
        assert_matches::assert_matches!(decode(r#"[2, 9129137332, {"roles": {"broker": {}}}]"#), Ok(IncomingMessage::Welcome(message)) => {
            pretty_assertions::assert_eq!(message, WelcomeMessage {
                session: Id::try_from(9129137332).unwrap(),
                details: Dictionary::from_iter([(
                    "roles".to_owned(),
                    Value::Dictionary(Dictionary::from_iter([(
                        "broker".to_owned(),
                        Value::Dictionary(Dictionary::default()),
                    )])),
                )]),
            });
        });
    }

    #[test]
    fn defaults_missing_trailing_arguments() {
        assert_matches::assert_matches!(decode(r#"[36, 5512315355, 4429313566, {}]"#), Ok(IncomingMessage::Event(message)) => {
            pretty_assertions::assert_eq!(message, EventMessage {
                subscription: Id::try_from(5512315355).unwrap(),
                publication: Id::try_from(4429313566).unwrap(),
                details: Dictionary::default(),
                arguments: List::default(),
                arguments_keyword: Dictionary::default(),
            });
        });
        assert_matches::assert_matches!(decode(r#"[68, 6, 2, {}, [2, 3], {"round": true}]"#), Ok(IncomingMessage::Invocation(message)) => {
            pretty_assertions::assert_eq!(message, InvocationMessage {
                request: Id::try_from(6).unwrap(),
                registration: Id::try_from(2).unwrap(),
                details: Dictionary::default(),
                arguments: List::from_iter([Value::Integer(2), Value::Integer(3)]),
                arguments_keyword: Dictionary::from_iter([("round".to_owned(), Value::Bool(true))]),
            });
        });
    }

    #[test]
    fn reads_error_request_kind() {
        let message = decode(r#"[8, 48, 7814135, {}, "wamp.error.no_such_procedure"]"#).unwrap();
        assert_eq!(message.answers(), Some(Id::try_from(7814135).unwrap()));
        assert_matches::assert_matches!(message, IncomingMessage::Error(message) => {
            pretty_assertions::assert_eq!(message, ErrorMessage {
                request_kind: RequestKind::Call,
                request: Id::try_from(7814135).unwrap(),
                details: Dictionary::default(),
                error: Uri::try_from("wamp.error.no_such_procedure").unwrap(),
                arguments: List::default(),
                arguments_keyword: Dictionary::default(),
            });
        });
    }

    #[test]
    fn rejects_messages_routers_do_not_send() {
        // HELLO and CALL only ever travel from client to router.
        assert_matches::assert_matches!(decode(r#"[1, "realm1", {}]"#), Err(err) => {
            assert!(err.to_string().contains("IncomingMessage tuple"));
        });
        assert_matches::assert_matches!(decode(r#"[48, 1, {}, "com.example.add2"]"#), Err(_));
        assert_matches::assert_matches!(decode(r#"[99, 1]"#), Err(_));
    }

    #[test]
    fn names_message_for_logging() {
        let message = decode(r#"[50, 31, {}, [15]]"#).unwrap();
        assert_eq!(message.name(), "RESULT");
        assert_eq!(message.answers(), Some(Id::try_from(31).unwrap()));
        assert_eq!(decode(r#"[6, {}, "wamp.close.normal"]"#).unwrap().answers(), None);
    }
}
