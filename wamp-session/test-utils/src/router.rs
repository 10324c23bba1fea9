//! A minimal in-process WAMP router for tests.
//!
//! The router speaks `wamp.2.json` over WebSocket and implements just enough of the broker and
//! dealer roles to exercise a client: one session per connection, exact topic and procedure
//! matching, and a single callee per procedure.

use std::{
    net::SocketAddr,
    sync::Arc,
};

use ahash::HashMap;
use anyhow::{
    Error,
    Result,
};
use futures_util::{
    SinkExt,
    StreamExt,
};
use log::{
    debug,
    error,
};
use serde_json::{
    Value,
    json,
};
use tokio::{
    net::{
        TcpListener,
        TcpStream,
    },
    sync::{
        Mutex,
        broadcast,
        mpsc,
    },
    task::JoinHandle,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Message,
        handshake::server::{
            ErrorResponse,
            Request,
            Response,
        },
        http::{
            HeaderValue,
            StatusCode,
            header::SEC_WEBSOCKET_PROTOCOL,
        },
    },
};

const PROTOCOL: &str = "wamp.2.json";

const HELLO: u64 = 1;
const WELCOME: u64 = 2;
const ABORT: u64 = 3;
const GOODBYE: u64 = 6;
const ERROR: u64 = 8;
const PUBLISH: u64 = 16;
const PUBLISHED: u64 = 17;
const SUBSCRIBE: u64 = 32;
const SUBSCRIBED: u64 = 33;
const EVENT: u64 = 36;
const CALL: u64 = 48;
const RESULT: u64 = 50;
const REGISTER: u64 = 64;
const REGISTERED: u64 = 65;
const INVOCATION: u64 = 68;
const YIELD: u64 = 70;

/// Configuration for a [`LocalRouter`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Realms sessions may join.
    pub realms: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            realms: Vec::from_iter(["realm1".to_owned()]),
        }
    }
}

enum Outgoing {
    Message(Value),
    Ping(Vec<u8>),
    Disconnect,
}

struct Subscription {
    id: u64,
    subscribers: Vec<u64>,
}

struct Registration {
    id: u64,
    callee: u64,
}

struct PendingInvocation {
    caller: u64,
    call_request: u64,
}

#[derive(Default)]
struct RouterState {
    next_id: u64,
    sessions: HashMap<u64, mpsc::UnboundedSender<Outgoing>>,
    subscriptions: HashMap<String, Subscription>,
    registrations: HashMap<String, Registration>,
    invocations: HashMap<u64, PendingInvocation>,
    pongs: u64,
}

impl RouterState {
    fn generate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn send(&self, session: u64, message: Value) {
        if let Some(tx) = self.sessions.get(&session) {
            tx.send(Outgoing::Message(message)).ok();
        }
    }

    fn remove_session(&mut self, session: u64) {
        self.sessions.remove(&session);
        for subscription in self.subscriptions.values_mut() {
            subscription.subscribers.retain(|subscriber| *subscriber != session);
        }
        self.registrations
            .retain(|_, registration| registration.callee != session);
    }
}

/// A handle to a running [`LocalRouter`].
pub struct RouterHandle {
    local_addr: SocketAddr,
    state: Arc<Mutex<RouterState>>,
    join_handle: JoinHandle<()>,
    cancel_tx: broadcast::Sender<()>,
}

impl RouterHandle {
    /// The local address of the router.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The number of sessions currently joined.
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Asks every joined session to leave with a GOODBYE.
    pub async fn shut_down_sessions(&self) {
        let state = self.state.lock().await;
        for tx in state.sessions.values() {
            tx.send(Outgoing::Message(json!([
                GOODBYE,
                {},
                "wamp.close.system_shutdown"
            ])))
            .ok();
        }
    }

    /// Sends a ping to every joined session.
    pub async fn ping_sessions(&self, data: &[u8]) {
        let state = self.state.lock().await;
        for tx in state.sessions.values() {
            tx.send(Outgoing::Ping(data.to_vec())).ok();
        }
    }

    /// Drops the connection of every joined session without a GOODBYE.
    pub async fn disconnect_sessions(&self) {
        let state = self.state.lock().await;
        for tx in state.sessions.values() {
            tx.send(Outgoing::Disconnect).ok();
        }
    }

    /// Sends a message to one joined session as is, outside of any broker or dealer flow.
    pub async fn send_to_session(&self, session: u64, message: Value) {
        self.state.lock().await.send(session, message);
    }

    /// The number of pongs received from sessions.
    pub async fn pongs_received(&self) -> u64 {
        self.state.lock().await.pongs
    }

    /// Cancels the router.
    pub fn cancel(&self) -> Result<()> {
        self.cancel_tx.send(()).map(|_| ()).map_err(Error::new)
    }

    /// Waits for the router to stop accepting connections.
    pub async fn join(self) -> Result<()> {
        self.join_handle.await.map_err(Error::new)
    }
}

/// A minimal WAMP router listening on a local port.
pub struct LocalRouter {
    config: Arc<RouterConfig>,
    state: Arc<Mutex<RouterState>>,
}

impl LocalRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(RouterState::default())),
        }
    }

    /// Starts the router on an ephemeral port.
    pub async fn start(self) -> Result<RouterHandle> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let state = self.state.clone();
        let join_handle = tokio::spawn(self.connection_loop(listener, cancel_rx));
        Ok(RouterHandle {
            local_addr,
            state,
            join_handle,
            cancel_tx,
        })
    }

    async fn connection_loop(
        self,
        listener: TcpListener,
        mut cancel_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accept = listener.accept() => {
                    let (stream, addr) = match accept {
                        Ok(accepted) => accepted,
                        Err(_) => break,
                    };
                    let connection = Connection {
                        config: self.config.clone(),
                        state: self.state.clone(),
                        session: None,
                        goodbye_sent: false,
                    };
                    tokio::spawn(async move {
                        if let Err(err) = connection.run(stream).await {
                            error!("Router connection from {addr} failed: {err:#}");
                        }
                    });
                }
                _ = cancel_rx.recv() => break,
            }
        }
    }
}

/// Starts a [`LocalRouter`] with the given configuration.
pub async fn start_router(config: RouterConfig) -> Result<RouterHandle> {
    LocalRouter::new(config).start().await
}

fn negotiate(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let supported = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|protocols| protocols.to_str().ok())
        .is_some_and(|protocols| {
            protocols
                .split(',')
                .any(|protocol| protocol.trim() == PROTOCOL)
        });
    if !supported {
        let mut response = ErrorResponse::new(Some("no supported protocol".to_owned()));
        *response.status_mut() = StatusCode::BAD_REQUEST;
        return Err(response);
    }
    response
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL));
    Ok(response)
}

/// Copies the optional trailing arguments and keyword arguments of a message.
fn payload(message: &[Value], from: usize) -> Vec<Value> {
    message.iter().skip(from).cloned().collect()
}

fn field_u64(message: &[Value], index: usize) -> Result<u64> {
    message
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::msg(format!("expected integer at index {index}")))
}

fn field_str(message: &[Value], index: usize) -> Result<&str> {
    message
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::msg(format!("expected string at index {index}")))
}

fn with_payload(mut message: Vec<Value>, payload: Vec<Value>) -> Value {
    message.extend(payload);
    Value::Array(message)
}

enum Flow {
    Continue,
    Close,
}

struct Connection {
    config: Arc<RouterConfig>,
    state: Arc<Mutex<RouterState>>,
    session: Option<u64>,
    goodbye_sent: bool,
}

impl Connection {
    async fn run(mut self, stream: TcpStream) -> Result<()> {
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, negotiate).await?;
        let result = self.message_loop(&mut ws).await;
        if let Some(session) = self.session {
            debug!("Router session {session} ended");
            self.state.lock().await.remove_session(session);
        }
        ws.close(None).await.ok();
        result
    }

    async fn message_loop(&mut self, ws: &mut WebSocketStream<TcpStream>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        loop {
            tokio::select! {
                message = ws.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Pong(_))) => {
                            self.state.lock().await.pongs += 1;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => return Err(err.into()),
                    };
                    let message = match serde_json::from_str::<Value>(text.as_str())? {
                        Value::Array(message) => message,
                        _ => return Err(Error::msg("message is not an array")),
                    };
                    let (replies, flow) = self.handle_message(&tx, message).await?;
                    for reply in replies {
                        ws.send(Message::text(reply.to_string())).await?;
                    }
                    if let Flow::Close = flow {
                        return Ok(());
                    }
                }
                Some(outgoing) = rx.recv() => {
                    match outgoing {
                        Outgoing::Message(message) => {
                            if message[0] == GOODBYE {
                                self.goodbye_sent = true;
                            }
                            ws.send(Message::text(message.to_string())).await?;
                        }
                        Outgoing::Ping(data) => ws.send(Message::Ping(data.into())).await?,
                        Outgoing::Disconnect => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_message(
        &mut self,
        tx: &mpsc::UnboundedSender<Outgoing>,
        message: Vec<Value>,
    ) -> Result<(Vec<Value>, Flow)> {
        let tag = field_u64(&message, 0)?;
        let mut state = self.state.lock().await;

        let session = match (self.session, tag) {
            (None, HELLO) => {
                let realm = field_str(&message, 1)?;
                if !self.config.realms.iter().any(|known| known == realm) {
                    let abort = json!([
                        ABORT,
                        { "message": format!("realm {realm} does not exist") },
                        "wamp.error.no_such_realm"
                    ]);
                    return Ok((Vec::from_iter([abort]), Flow::Close));
                }
                let session = state.generate_id();
                state.sessions.insert(session, tx.clone());
                self.session = Some(session);
                let welcome = json!([
                    WELCOME,
                    session,
                    { "roles": { "broker": {}, "dealer": {} } }
                ]);
                return Ok((Vec::from_iter([welcome]), Flow::Continue));
            }
            (Some(session), _) => session,
            (None, _) => return Err(Error::msg("message received before HELLO")),
        };

        let replies = match tag {
            GOODBYE => {
                if self.goodbye_sent {
                    return Ok((Vec::new(), Flow::Close));
                }
                let goodbye = json!([GOODBYE, {}, "wamp.close.goodbye_and_out"]);
                return Ok((Vec::from_iter([goodbye]), Flow::Close));
            }
            SUBSCRIBE => {
                let request = field_u64(&message, 1)?;
                let topic = field_str(&message, 3)?.to_owned();
                let id = match state.subscriptions.get(&topic) {
                    Some(subscription) => subscription.id,
                    None => state.generate_id(),
                };
                let subscription = state.subscriptions.entry(topic).or_insert(Subscription {
                    id,
                    subscribers: Vec::new(),
                });
                if !subscription.subscribers.contains(&session) {
                    subscription.subscribers.push(session);
                }
                Vec::from_iter([json!([SUBSCRIBED, request, id])])
            }
            PUBLISH => {
                let request = field_u64(&message, 1)?;
                let acknowledge = message
                    .get(2)
                    .and_then(|options| options.get("acknowledge"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let topic = field_str(&message, 3)?;
                let publication = state.generate_id();
                if let Some(subscription) = state.subscriptions.get(topic) {
                    for subscriber in &subscription.subscribers {
                        if *subscriber == session {
                            continue;
                        }
                        let event = with_payload(
                            Vec::from_iter([
                                json!(EVENT),
                                json!(subscription.id),
                                json!(publication),
                                json!({}),
                            ]),
                            payload(&message, 4),
                        );
                        state.send(*subscriber, event);
                    }
                }
                if acknowledge {
                    Vec::from_iter([json!([PUBLISHED, request, publication])])
                } else {
                    Vec::new()
                }
            }
            REGISTER => {
                let request = field_u64(&message, 1)?;
                let procedure = field_str(&message, 3)?.to_owned();
                if state.registrations.contains_key(&procedure) {
                    Vec::from_iter([json!([
                        ERROR,
                        REGISTER,
                        request,
                        {},
                        "wamp.error.procedure_already_exists"
                    ])])
                } else {
                    let id = state.generate_id();
                    state.registrations.insert(
                        procedure,
                        Registration {
                            id,
                            callee: session,
                        },
                    );
                    Vec::from_iter([json!([REGISTERED, request, id])])
                }
            }
            CALL => {
                let request = field_u64(&message, 1)?;
                let procedure = field_str(&message, 3)?;
                match state
                    .registrations
                    .get(procedure)
                    .map(|registration| (registration.id, registration.callee))
                {
                    Some((registration, callee)) => {
                        let invocation = state.generate_id();
                        state.invocations.insert(
                            invocation,
                            PendingInvocation {
                                caller: session,
                                call_request: request,
                            },
                        );
                        let message = with_payload(
                            Vec::from_iter([
                                json!(INVOCATION),
                                json!(invocation),
                                json!(registration),
                                json!({}),
                            ]),
                            payload(&message, 4),
                        );
                        state.send(callee, message);
                        Vec::new()
                    }
                    None => Vec::from_iter([json!([
                        ERROR,
                        CALL,
                        request,
                        { "message": format!("procedure {procedure} is not registered") },
                        "wamp.error.no_such_procedure"
                    ])]),
                }
            }
            YIELD => {
                let invocation = field_u64(&message, 1)?;
                if let Some(pending) = state.invocations.remove(&invocation) {
                    let result = with_payload(
                        Vec::from_iter([json!(RESULT), json!(pending.call_request), json!({})]),
                        payload(&message, 3),
                    );
                    state.send(pending.caller, result);
                }
                Vec::new()
            }
            ERROR => {
                let request_type = field_u64(&message, 1)?;
                let invocation = field_u64(&message, 2)?;
                if request_type == INVOCATION {
                    if let Some(pending) = state.invocations.remove(&invocation) {
                        let error = with_payload(
                            Vec::from_iter([
                                json!(ERROR),
                                json!(CALL),
                                json!(pending.call_request),
                            ]),
                            payload(&message, 3),
                        );
                        state.send(pending.caller, error);
                    }
                }
                Vec::new()
            }
            tag => {
                let abort = json!([
                    ABORT,
                    { "message": format!("unexpected message type {tag}") },
                    "wamp.error.protocol_violation"
                ]);
                return Ok((Vec::from_iter([abort]), Flow::Close));
            }
        };
        Ok((replies, Flow::Continue))
    }
}
