use std::{
    fmt::Debug,
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use futures_util::{
    Sink,
    SinkExt,
    Stream,
    StreamExt,
};
use tokio::{
    io::{
        AsyncRead,
        AsyncWrite,
    },
    net::TcpStream,
};
use tokio_tungstenite::{
    WebSocketStream,
    client_async,
    tungstenite::{
        ClientRequestBuilder,
        Message,
        http::header::SEC_WEBSOCKET_PROTOCOL,
    },
};

use crate::{
    core::endpoint::Endpoint,
    serializer::SerializerType,
    session::SessionConfig,
    transport::transport::{
        Connection,
        Connector,
        Transport,
        TransportData,
    },
};

/// A transport implemented for a stream using the WebSocket protocol.
///
/// Text frames carry JSON messages and binary frames carry MessagePack messages.
#[derive(Debug)]
pub struct WebSocketTransport<S> {
    stream: WebSocketStream<S>,
    binary: bool,
}

impl<S> WebSocketTransport<S> {
    /// Wraps an established WebSocket stream.
    pub fn new(stream: WebSocketStream<S>, serializer_type: SerializerType) -> Self {
        Self {
            stream,
            binary: serializer_type.binary(),
        }
    }
}

impl<S> Transport for WebSocketTransport<S> where S: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<S> Stream for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<TransportData>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let message = match futures_util::ready!(self.stream.poll_next_unpin(cx)) {
            Some(Ok(message)) => message,
            Some(Err(err)) => return task::Poll::Ready(Some(Err(err.into()))),
            None => return task::Poll::Ready(None),
        };
        let data = match message {
            Message::Ping(data) => Ok(TransportData::Ping(data.to_vec())),
            Message::Text(_) if self.binary => Err(Error::msg("expected binary")),
            Message::Binary(_) if !self.binary => Err(Error::msg("expected text")),
            Message::Text(_) | Message::Binary(_) => {
                Ok(TransportData::Message(message.into_data().to_vec()))
            }
            Message::Close(_) => return task::Poll::Ready(None),
            _ => Err(Error::msg("unexpected websocket message")),
        };
        task::Poll::Ready(Some(data))
    }
}

impl<S> Sink<TransportData> for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_ready_unpin(cx).map_err(Error::new)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: TransportData,
    ) -> std::result::Result<(), Self::Error> {
        let message = match item {
            TransportData::Ping(data) => Message::Pong(data.into()),
            TransportData::Message(data) => {
                if self.binary {
                    Message::Binary(data.into())
                } else {
                    Message::Text(String::from_utf8(data)?.into())
                }
            }
        };
        self.stream.start_send_unpin(message).map_err(Error::new)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_flush_unpin(cx).map_err(Error::new)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_close_unpin(cx).map_err(Error::new)
    }
}

/// A [`Connector`] that opens a TCP connection and upgrades it to a WebSocket, offering every
/// configured serializer as a sub-protocol.
#[derive(Debug, Default)]
pub struct WebSocketConnector {}

#[async_trait]
impl Connector<TcpStream> for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn handshake(
        &self,
        config: &SessionConfig,
        endpoint: &Endpoint,
        stream: TcpStream,
    ) -> Result<Connection> {
        let mut request = ClientRequestBuilder::new(endpoint.web_socket_url().try_into()?);
        if !config.agent.is_empty() {
            request = request.with_header("User-Agent", &config.agent);
        }
        for serializer in &config.serializers {
            request = request.with_sub_protocol(serializer.protocol());
        }

        let (stream, response) = client_async(request, stream).await?;
        let serializer = match response.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            Some(protocol) => SerializerType::try_from(protocol.to_str()?).map_err(Error::msg)?,
            None => return Err(Error::msg("handshake did not produce a sub-protocol")),
        };

        Ok(Connection {
            transport: Box::new(WebSocketTransport::new(stream, serializer)),
            serializer,
        })
    }
}
