use std::{
    sync::{
        Arc,
        OnceLock,
    },
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::lock::Mutex;
use log::{
    debug,
    info,
    warn,
};
use tokio::{
    sync::{
        mpsc,
        oneshot,
    },
    task::JoinHandle,
};

use crate::{
    core::{
        endpoint::Endpoint,
        error::{
            CallError,
            ConnectError,
            JoinError,
            RequestError,
            SessionStartError,
        },
        id::Id,
        roles::PeerRole,
        types::List,
        uri::Uri,
    },
    serializer::SerializerType,
    session::{
        context::{
            CallResult,
            EventHandler,
            InvocationHandler,
        },
        session_loop::SessionLoop,
        state::{
            SessionState,
            SharedSessionState,
        },
    },
    transport::{
        Connector,
        MessageChannel,
        WebSocketConnector,
    },
};

const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// How long to wait for the router to acknowledge a GOODBYE.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the session, mostly for logging.
    pub name: String,
    /// Agent name, communicated to the router.
    pub agent: String,
    /// Roles advertised to the router.
    pub roles: Vec<PeerRole>,
    /// Allowed serializers, in order of preference.
    ///
    /// The actual serializer is negotiated during the transport handshake.
    pub serializers: Vec<SerializerType>,
    /// How long a registered procedure has to complete an invocation.
    ///
    /// Invocations still open at the deadline are answered with `wamp.error.timeout`.
    pub invocation_timeout: Option<Duration>,
}

impl SessionConfig {
    fn validate(&self) -> Result<()> {
        if self.serializers.is_empty() {
            return Err(Error::msg("at least one serializer is required"));
        }
        if self.roles.is_empty() {
            return Err(Error::msg("at least one role is required"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT.to_owned(),
            agent: DEFAULT_AGENT.to_owned(),
            roles: Vec::from_iter([
                PeerRole::Caller,
                PeerRole::Callee,
                PeerRole::Publisher,
                PeerRole::Subscriber,
            ]),
            serializers: Vec::from_iter([SerializerType::Json, SerializerType::MessagePack]),
            invocation_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// A command from a [`Session`] to its event loop.
pub(crate) enum Command {
    Join {
        realm: Uri,
        result_tx: oneshot::Sender<Result<Id, JoinError>>,
    },
    Subscribe {
        topic: Uri,
        handler: Arc<dyn EventHandler>,
        result_tx: oneshot::Sender<Result<Id, RequestError>>,
    },
    Publish {
        topic: Uri,
        arguments: List,
        result_tx: oneshot::Sender<Result<Id, RequestError>>,
    },
    Register {
        procedure: Uri,
        handler: Arc<dyn InvocationHandler>,
        result_tx: oneshot::Sender<Result<Id, RequestError>>,
    },
    Call {
        procedure: Uri,
        arguments: List,
        result_tx: oneshot::Sender<Result<CallResult, CallError>>,
    },
    Close {
        done_tx: oneshot::Sender<()>,
    },
}

struct RunningSession {
    command_tx: mpsc::UnboundedSender<Command>,
    join_handle: JoinHandle<()>,
}

enum ConnectionState<S> {
    Idle,
    Connected { endpoint: Endpoint, stream: S },
    Running(RunningSession),
    Finished,
}

/// A WAMP client session.
///
/// A session moves through its [`SessionState`]s in order: it connects to a router, starts the
/// transport, and joins a realm. Once joined, it can subscribe, publish, register, and call.
///
/// All messaging runs on a single event loop task, spawned by [`Session::start`]. Methods only
/// take `&self`, so a session can be shared across tasks with an [`Arc`].
pub struct Session<S> {
    config: SessionConfig,
    connector: Box<dyn Connector<S>>,
    state: SharedSessionState,
    session_id: Arc<OnceLock<Id>>,
    connection: Mutex<ConnectionState<S>>,
}

/// A session over a WebSocket transport.
pub type WebSocketSession = Session<tokio::net::TcpStream>;

/// Creates a new session over a WebSocket transport.
pub fn new_web_socket_session(config: SessionConfig) -> Result<WebSocketSession> {
    Session::new(config, Box::new(WebSocketConnector::default()))
}

impl<S> Session<S>
where
    S: Send + 'static,
{
    /// Creates a new session, which is not yet connected.
    pub fn new(config: SessionConfig, connector: Box<dyn Connector<S>>) -> Result<Self> {
        config.validate()?;
        let state = SharedSessionState::new(&config.name);
        Ok(Self {
            config,
            connector,
            state,
            session_id: Arc::new(OnceLock::new()),
            connection: Mutex::new(ConnectionState::Idle),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The current state of the session.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// The router-assigned session ID, available after joining a realm.
    pub fn session_id(&self) -> Option<Id> {
        self.session_id.get().copied()
    }

    /// Connects the underlying transport to the router.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectError> {
        let mut connection = self.connection.lock().await;
        self.state
            .transition(SessionState::Connecting)
            .map_err(ConnectError::InvalidState)?;
        info!("Session {} connecting to {endpoint}", self.config.name);
        let stream = match self.connector.connect(endpoint).await {
            Ok(stream) => stream,
            Err(err) => {
                self.state.fail();
                return Err(ConnectError::Failed {
                    endpoint: endpoint.clone(),
                    source: err,
                });
            }
        };
        *connection = ConnectionState::Connected {
            endpoint: endpoint.clone(),
            stream,
        };
        self.state
            .transition(SessionState::Connected)
            .map_err(ConnectError::InvalidState)?;
        Ok(())
    }

    /// Starts the session over the connected transport.
    ///
    /// Performs the transport handshake and spawns the event loop. Must be called exactly once,
    /// after [`Self::connect`] and before [`Self::join`].
    pub async fn start(&self) -> Result<(), SessionStartError> {
        let mut connection = self.connection.lock().await;
        let (endpoint, stream) =
            match std::mem::replace(&mut *connection, ConnectionState::Idle) {
                ConnectionState::Connected { endpoint, stream } => (endpoint, stream),
                other => {
                    *connection = other;
                    return Err(match self.state.get() {
                        SessionState::Disconnected | SessionState::Connecting => {
                            SessionStartError::NotConnected
                        }
                        state => SessionStartError::InvalidState(state),
                    });
                }
            };
        self.state
            .transition(SessionState::Starting)
            .map_err(SessionStartError::InvalidState)?;

        let handshake = self
            .connector
            .handshake(&self.config, &endpoint, stream)
            .await;
        let established = match handshake {
            Ok(established) => established,
            Err(err) => {
                *connection = ConnectionState::Finished;
                self.state.fail();
                return Err(SessionStartError::Handshake(err));
            }
        };
        info!(
            "Session {} started transport to {endpoint} using {}",
            self.config.name,
            established.serializer.protocol()
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let session_loop = SessionLoop::new(
            self.config.clone(),
            MessageChannel::from(established),
            command_rx,
            self.state.clone(),
            self.session_id.clone(),
        );
        let join_handle = tokio::spawn(session_loop.run());
        *connection = ConnectionState::Running(RunningSession {
            command_tx,
            join_handle,
        });
        Ok(())
    }

    async fn command_tx(&self) -> Option<mpsc::UnboundedSender<Command>> {
        match &*self.connection.lock().await {
            ConnectionState::Running(running) => Some(running.command_tx.clone()),
            _ => None,
        }
    }

    async fn joined_command_tx(&self) -> Result<mpsc::UnboundedSender<Command>, RequestError> {
        let state = self.state.get();
        if state != SessionState::Joined {
            return Err(RequestError::NotJoined(state));
        }
        self.command_tx().await.ok_or(RequestError::SessionLost)
    }

    /// Joins a realm on the router, returning the session ID assigned by the router.
    pub async fn join(&self, realm: &str) -> Result<Id, JoinError> {
        let realm = Uri::try_from(realm)?;
        let state = self.state.get();
        if state != SessionState::Starting {
            return Err(JoinError::InvalidState(state));
        }
        let command_tx = self.command_tx().await.ok_or(JoinError::SessionLost)?;
        let (result_tx, result_rx) = oneshot::channel();
        command_tx
            .send(Command::Join { realm, result_tx })
            .map_err(|_| JoinError::SessionLost)?;
        result_rx.await.map_err(|_| JoinError::SessionLost)?
    }

    /// Subscribes to a topic, returning the subscription ID.
    ///
    /// `handler` is invoked on the event loop for every event published to the topic after the
    /// router confirms the subscription.
    pub async fn subscribe<H>(&self, topic: Uri, handler: H) -> Result<Id, RequestError>
    where
        H: EventHandler + 'static,
    {
        let command_tx = self.joined_command_tx().await?;
        let (result_tx, result_rx) = oneshot::channel();
        command_tx
            .send(Command::Subscribe {
                topic,
                handler: Arc::new(handler),
                result_tx,
            })
            .map_err(|_| RequestError::SessionLost)?;
        result_rx.await.map_err(|_| RequestError::SessionLost)?
    }

    /// Publishes an event to a topic, returning the publication ID once the router acknowledges
    /// it.
    pub async fn publish(&self, topic: Uri, arguments: List) -> Result<Id, RequestError> {
        let command_tx = self.joined_command_tx().await?;
        let (result_tx, result_rx) = oneshot::channel();
        command_tx
            .send(Command::Publish {
                topic,
                arguments,
                result_tx,
            })
            .map_err(|_| RequestError::SessionLost)?;
        result_rx.await.map_err(|_| RequestError::SessionLost)?
    }

    /// Registers a procedure, returning the registration ID.
    ///
    /// `handler` is invoked on the event loop for every invocation of the procedure.
    pub async fn register<H>(&self, procedure: Uri, handler: H) -> Result<Id, RequestError>
    where
        H: InvocationHandler + 'static,
    {
        let command_tx = self.joined_command_tx().await?;
        let (result_tx, result_rx) = oneshot::channel();
        command_tx
            .send(Command::Register {
                procedure,
                handler: Arc::new(handler),
                result_tx,
            })
            .map_err(|_| RequestError::SessionLost)?;
        result_rx.await.map_err(|_| RequestError::SessionLost)?
    }

    /// Calls a procedure and waits for its result.
    pub async fn call(&self, procedure: Uri, arguments: List) -> Result<CallResult, CallError> {
        let command_tx = self.joined_command_tx().await?;
        let (result_tx, result_rx) = oneshot::channel();
        command_tx
            .send(Command::Call {
                procedure,
                arguments,
                result_tx,
            })
            .map_err(|_| CallError::SessionLost)?;
        result_rx.await.map_err(|_| CallError::SessionLost)?
    }

    /// Closes the session.
    ///
    /// A joined session says goodbye to the router before the transport is dropped. The session
    /// ends in [`SessionState::Closed`].
    pub async fn close(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        match std::mem::replace(&mut *connection, ConnectionState::Finished) {
            ConnectionState::Running(running) => {
                let (done_tx, done_rx) = oneshot::channel();
                if running.command_tx.send(Command::Close { done_tx }).is_ok()
                    && tokio::time::timeout(CLOSE_TIMEOUT, done_rx).await.is_err()
                {
                    warn!(
                        "Session {} did not receive GOODBYE from the router in time",
                        self.config.name
                    );
                    running.join_handle.abort();
                    self.state.transition(SessionState::Closed).ok();
                    return Ok(());
                }
                running.join_handle.await.map_err(Error::new)?;
            }
            ConnectionState::Idle | ConnectionState::Connected { .. } => {
                if !self.state.get().terminal() {
                    self.state.transition(SessionState::Closed).map_err(|state| {
                        Error::msg(format!("cannot close a session that is {state}"))
                    })?;
                }
            }
            ConnectionState::Finished => (),
        }
        debug!(
            "Session {} closed in state {}",
            self.config.name,
            self.state.get()
        );
        Ok(())
    }

    /// Waits until the session finishes, returning its terminal state.
    pub async fn wait_until_finished(&self) -> SessionState {
        let mut state_rx = self.state.subscribe();
        match state_rx.wait_for(|state| state.terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state.get(),
        }
    }
}
