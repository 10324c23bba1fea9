use std::fmt::Debug;

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use futures_util::{
    Sink,
    Stream,
};

use crate::{
    core::endpoint::Endpoint,
    serializer::SerializerType,
    session::SessionConfig,
};

/// Data received from or sent over a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportData {
    /// Data that should be perceived as a health check and immediately sent back to the sender.
    Ping(Vec<u8>),
    /// Data representing a meaningful WAMP message.
    Message(Vec<u8>),
}

/// A transport, over which WAMP messages can be sent and received.
///
/// Implemented as a [`Stream`] and [`Sink`] that extracts out meaningful data and reports protocol
/// violations to be handled at higher layers. The stream ending means the transport closed.
pub trait Transport:
    Send + Stream<Item = Result<TransportData>> + Sink<TransportData, Error = Error> + Unpin + Debug
{
}

/// A transport that has completed its handshake with the router.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub serializer: SerializerType,
}

/// A type for establishing a transport with a router.
///
/// Establishing a transport happens in two steps, so that a session can observe the raw
/// connection separately from the transport handshake.
#[async_trait]
pub trait Connector<S>: Send + Sync {
    /// Opens the underlying connection to the endpoint.
    async fn connect(&self, endpoint: &Endpoint) -> Result<S>;

    /// Performs the transport handshake over a connected stream, negotiating the serializer.
    async fn handshake(
        &self,
        config: &SessionConfig,
        endpoint: &Endpoint,
        stream: S,
    ) -> Result<Connection>;
}
