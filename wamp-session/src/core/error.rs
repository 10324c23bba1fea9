use thiserror::Error;

use crate::{
    core::{
        endpoint::Endpoint,
        types::{
            Dictionary,
            List,
            Value,
            WampDeserializeError,
        },
        uri::{
            InvalidUri,
            Uri,
        },
    },
    message::message::{
        AbortMessage,
        ErrorMessage,
    },
    session::SessionState,
};

/// An error reported by the router or by a remote peer, read out of an ABORT or ERROR message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {message}")]
pub struct RemoteError {
    /// The error URI, such as `wamp.error.no_such_procedure`.
    pub reason: Uri,
    pub message: String,
    /// Positional arguments attached to the error.
    pub arguments: List,
}

impl RemoteError {
    pub fn new(reason: Uri, message: String) -> Self {
        Self {
            reason,
            message,
            arguments: List::default(),
        }
    }

    /// Reads an error out of the parts shared by ABORT and ERROR messages.
    ///
    /// Routers put the human-readable message in the `message` detail, while peers commonly send
    /// it as the first positional argument.
    fn from_parts(reason: &Uri, details: &Dictionary, arguments: &List) -> Self {
        let as_string = |value: &Value| match value {
            Value::String(message) => Some(message.clone()),
            _ => None,
        };
        let message = details
            .get("message")
            .and_then(as_string)
            .or_else(|| arguments.first().and_then(as_string))
            .unwrap_or_else(|| "unknown error".to_owned());
        Self {
            reason: reason.clone(),
            message,
            arguments: arguments.clone(),
        }
    }
}

impl From<&ErrorMessage> for RemoteError {
    fn from(value: &ErrorMessage) -> Self {
        Self::from_parts(&value.error, &value.details, &value.arguments)
    }
}

impl From<&AbortMessage> for RemoteError {
    fn from(value: &AbortMessage) -> Self {
        Self::from_parts(&value.reason, &value.details, &value.arguments)
    }
}

/// An error establishing the transport connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot connect a session that is {0}")]
    InvalidState(SessionState),
    #[error("failed to connect to {endpoint}")]
    Failed {
        endpoint: Endpoint,
        #[source]
        source: anyhow::Error,
    },
}

/// An error starting the session over a connected transport.
#[derive(Debug, Error)]
pub enum SessionStartError {
    #[error("session transport is not connected")]
    NotConnected,
    #[error("cannot start a session that is {0}")]
    InvalidState(SessionState),
    #[error("transport handshake failed")]
    Handshake(#[source] anyhow::Error),
}

/// An error joining a realm.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("cannot join a realm while {0}")]
    InvalidState(SessionState),
    #[error("invalid realm")]
    InvalidRealm(#[from] InvalidUri),
    #[error("realm rejected: {0}")]
    Rejected(#[source] RemoteError),
    #[error("session lost before joining")]
    SessionLost,
}

/// An error for a subscribe, publish, or register request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("session is not joined to a realm (session is {0})")]
    NotJoined(SessionState),
    #[error("request rejected: {0}")]
    Rejected(#[source] RemoteError),
    #[error("session lost before the request completed")]
    SessionLost,
}

impl RequestError {
    /// Whether the error means the session can no longer serve requests.
    pub fn session_unavailable(&self) -> bool {
        matches!(self, Self::NotJoined(_) | Self::SessionLost)
    }
}

/// An error for an outgoing procedure call.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("session is not joined to a realm (session is {0})")]
    NotJoined(SessionState),
    #[error("call failed: {0}")]
    Remote(#[source] RemoteError),
    #[error("session lost before the call completed")]
    SessionLost,
}

impl CallError {
    /// The error reported by the callee or router, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the error means the session can no longer serve requests.
    pub fn session_unavailable(&self) -> bool {
        matches!(self, Self::NotJoined(_) | Self::SessionLost)
    }
}

impl From<RequestError> for CallError {
    fn from(value: RequestError) -> Self {
        match value {
            RequestError::NotJoined(state) => Self::NotJoined(state),
            RequestError::Rejected(err) => Self::Remote(err),
            RequestError::SessionLost => Self::SessionLost,
        }
    }
}

/// An error reading a positional argument.
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("argument {index} is out of range for {len} arguments")]
    OutOfRange { index: usize, len: usize },
    #[error("argument {index} has the wrong type")]
    TypeMismatch {
        index: usize,
        #[source]
        source: WampDeserializeError,
    },
}

/// An error completing an invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("invocation was already completed")]
    AlreadyCompleted,
    #[error("session lost before the invocation completed")]
    SessionLost,
}
