use anyhow::Result;
use futures_util::{
    SinkExt,
    StreamExt,
};

use crate::{
    message::{
        incoming::IncomingMessage,
        outgoing::OutgoingMessage,
    },
    serializer::SerializerType,
    transport::{
        Connection,
        Transport,
        TransportData,
    },
};

/// Something read off a [`MessageChannel`].
#[derive(Debug)]
pub enum Inbound {
    /// A transport-level health check, to be answered with [`MessageChannel::pong`].
    Ping(Vec<u8>),
    Message(IncomingMessage),
}

/// A negotiated transport that speaks WAMP messages.
///
/// Decodes router messages and encodes client messages with the serializer agreed on during the
/// handshake.
#[derive(Debug)]
pub struct MessageChannel {
    transport: Box<dyn Transport>,
    serializer: SerializerType,
}

impl MessageChannel {
    pub fn new(transport: Box<dyn Transport>, serializer: SerializerType) -> Self {
        Self {
            transport,
            serializer,
        }
    }

    pub fn serializer(&self) -> SerializerType {
        self.serializer
    }

    /// Receives the next item from the router.
    ///
    /// Returns [`None`] once the transport is closed. Cancel safe.
    pub async fn recv(&mut self) -> Option<Result<Inbound>> {
        let data = match self.transport.next().await? {
            Ok(data) => data,
            Err(err) => return Some(Err(err)),
        };
        Some(match data {
            TransportData::Ping(data) => Ok(Inbound::Ping(data)),
            TransportData::Message(bytes) => self.serializer.decode(&bytes).map(Inbound::Message),
        })
    }

    pub async fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        let bytes = self.serializer.encode(message)?;
        self.transport.send(TransportData::Message(bytes)).await
    }

    /// Answers a ping with the same payload.
    pub async fn pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.transport.send(TransportData::Ping(data)).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

impl From<Connection> for MessageChannel {
    fn from(value: Connection) -> Self {
        Self::new(value.transport, value.serializer)
    }
}
