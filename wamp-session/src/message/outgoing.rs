use serde_struct_tuple::SerializeStructTuple;
use serde_struct_tuple_enum::SerializeStructTupleEnum;

use crate::{
    core::{
        close::CloseReason,
        id::Id,
        types::{
            Dictionary,
            Integer,
            List,
            Value,
        },
        uri::Uri,
    },
    message::message::{
        AbortMessage,
        CallMessage,
        ErrorMessage,
        GoodbyeMessage,
        HelloMessage,
        PublishMessage,
        RegisterMessage,
        RequestKind,
        SubscribeMessage,
        YieldMessage,
    },
};

fn details_with_message(message: &str) -> Dictionary {
    Dictionary::from_iter([("message".to_owned(), Value::String(message.to_owned()))])
}

/// A message sent by the client to the router.
#[derive(Debug, Clone, PartialEq, Eq, SerializeStructTupleEnum)]
#[tag(Integer)]
pub enum OutgoingMessage {
    #[tag = 1]
    Hello(HelloMessage),
    #[tag = 3]
    Abort(AbortMessage),
    #[tag = 6]
    Goodbye(GoodbyeMessage),
    #[tag = 8]
    Error(ErrorMessage),
    #[tag = 16]
    Publish(PublishMessage),
    #[tag = 32]
    Subscribe(SubscribeMessage),
    #[tag = 48]
    Call(CallMessage),
    #[tag = 64]
    Register(RegisterMessage),
    #[tag = 70]
    Yield(YieldMessage),
}

impl OutgoingMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "HELLO",
            Self::Abort(_) => "ABORT",
            Self::Goodbye(_) => "GOODBYE",
            Self::Error(_) => "ERROR",
            Self::Publish(_) => "PUBLISH",
            Self::Subscribe(_) => "SUBSCRIBE",
            Self::Call(_) => "CALL",
            Self::Register(_) => "REGISTER",
            Self::Yield(_) => "YIELD",
        }
    }

    /// Aborts the session because the router broke the protocol.
    pub fn protocol_violation(message: &str) -> Self {
        Self::Abort(AbortMessage {
            details: details_with_message(message),
            reason: Uri::for_wamp_error("protocol_violation"),
            ..Default::default()
        })
    }

    pub fn goodbye(reason: CloseReason) -> Self {
        Self::Goodbye(GoodbyeMessage {
            details: Dictionary::default(),
            reason: reason.uri(),
        })
    }

    /// Replies to an invocation with its result.
    pub fn invocation_result(request: Id, arguments: List, arguments_keyword: Dictionary) -> Self {
        Self::Yield(YieldMessage {
            request,
            options: Dictionary::default(),
            arguments,
            arguments_keyword,
        })
    }

    /// Replies to an invocation with an error.
    ///
    /// The message travels in the `message` detail, where callers look for it first.
    pub fn invocation_error(request: Id, error: Uri, message: &str) -> Self {
        Self::Error(ErrorMessage {
            request_kind: RequestKind::Invocation,
            request,
            details: details_with_message(message),
            error,
            arguments: List::default(),
            arguments_keyword: Dictionary::default(),
        })
    }
}

#[cfg(test)]
mod outgoing_test {
    use crate::{
        core::{
            close::CloseReason,
            id::Id,
            types::{
                Dictionary,
                List,
                Value,
            },
            uri::Uri,
        },
        message::{
            message::{
                CallMessage,
                HelloMessage,
                PublishMessage,
            },
            outgoing::OutgoingMessage,
        },
    };

    fn encode(message: &OutgoingMessage) -> String {
        serde_json::to_string(message).unwrap()
    }

    #[test]
    fn hello_always_carries_details() {
        assert_eq!(
            encode(&OutgoingMessage::Hello(HelloMessage {
                realm: Uri::try_from("realm1").unwrap(),
                details: Dictionary::default(),
            })),
            r#"[1,"realm1",{}]"#
        );
    }

    #[test]
    fn omits_trailing_empty_arguments() {
        assert_eq!(
            encode(&OutgoingMessage::Call(CallMessage {
                request: Id::try_from(7).unwrap(),
                options: Dictionary::default(),
                procedure: Uri::try_from("com.example.add2").unwrap(),
                arguments: List::from_iter([Value::Integer(2), Value::Integer(3)]),
                arguments_keyword: Dictionary::default(),
            })),
            r#"[48,7,{},"com.example.add2",[2,3]]"#
        );
        assert_eq!(
            encode(&OutgoingMessage::Publish(PublishMessage {
                request: Id::try_from(2).unwrap(),
                options: Dictionary::default(),
                topic: Uri::try_from("com.example.oncounter").unwrap(),
                arguments: List::default(),
                arguments_keyword: Dictionary::default(),
            })),
            r#"[16,2,{},"com.example.oncounter"]"#
        );
    }

    #[test]
    fn keeps_empty_arguments_before_keywords() {
        let message = OutgoingMessage::invocation_result(
            Id::try_from(4).unwrap(),
            List::default(),
            Dictionary::from_iter([("sum".to_owned(), Value::Integer(5))]),
        );
        assert_eq!(message.tag(), OutgoingMessage::YIELD_TAG);
        assert_eq!(encode(&message), r#"[70,4,{},[],{"sum":5}]"#);
    }

    #[test]
    fn invocation_error_names_invocation_request() {
        assert_eq!(
            encode(&OutgoingMessage::invocation_error(
                Id::try_from(9).unwrap(),
                Uri::for_wamp_error("canceled"),
                "dropped",
            )),
            r#"[8,68,9,{"message":"dropped"},"wamp.error.canceled"]"#
        );
    }

    #[test]
    fn goodbye_uses_close_reason() {
        assert_eq!(
            encode(&OutgoingMessage::goodbye(CloseReason::GoodbyeAndOut)),
            r#"[6,{},"wamp.close.goodbye_and_out"]"#
        );
        assert_eq!(OutgoingMessage::goodbye(CloseReason::Normal).name(), "GOODBYE");
    }
}
