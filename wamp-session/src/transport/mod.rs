mod channel;
mod transport;
mod web_socket_transport;

pub use channel::{
    Inbound,
    MessageChannel,
};
pub use transport::{
    Connection,
    Connector,
    Transport,
    TransportData,
};
pub use web_socket_transport::{
    WebSocketConnector,
    WebSocketTransport,
};
