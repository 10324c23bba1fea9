use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        OnceLock,
    },
};

use ahash::HashMap;
use anyhow::{
    Error,
    Result,
};
use futures_util::FutureExt;
use log::{
    debug,
    error,
    info,
    trace,
    warn,
};
use tokio::{
    sync::{
        mpsc,
        oneshot,
    },
    task::{
        AbortHandle,
        JoinSet,
    },
};

use crate::{
    core::{
        close::CloseReason,
        error::{
            CallError,
            JoinError,
            RemoteError,
            RequestError,
        },
        id::{
            Id,
            RequestIdSequence,
        },
        types::{
            Dictionary,
            Value,
        },
        uri::Uri,
    },
    message::{
        incoming::IncomingMessage,
        message::{
            CallMessage,
            ErrorMessage,
            EventMessage,
            HelloMessage,
            InvocationMessage,
            PublishMessage,
            RegisterMessage,
            SubscribeMessage,
        },
        outgoing::OutgoingMessage,
    },
    session::{
        context::{
            CallResult,
            CompletionFlag,
            EventContext,
            InvocationContext,
            InvocationReply,
        },
        handlers::HandlerTable,
        pending::{
            PendingRequest,
            PendingRequests,
        },
        session::{
            Command,
            SessionConfig,
        },
        state::{
            SessionState,
            SharedSessionState,
        },
    },
    transport::{
        Inbound,
        MessageChannel,
    },
};

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// How the session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Closed,
    Failed,
}

/// An invocation that has not been replied to yet.
struct OpenInvocation {
    completion: CompletionFlag,
    deadline: Option<AbortHandle>,
}

/// The event loop of a started session.
///
/// The loop exclusively owns the transport and all per-session tables, so requests, responses,
/// events, and invocations are processed one at a time.
pub(crate) struct SessionLoop {
    config: SessionConfig,
    channel: MessageChannel,
    command_rx: mpsc::UnboundedReceiver<Command>,
    reply_tx: mpsc::UnboundedSender<InvocationReply>,
    reply_rx: mpsc::UnboundedReceiver<InvocationReply>,
    state: SharedSessionState,
    session_id: Arc<OnceLock<Id>>,

    ids: RequestIdSequence,
    pending: PendingRequests,
    handlers: HandlerTable,
    invocations: HashMap<Id, OpenInvocation>,
    deadlines: JoinSet<Id>,

    join_tx: Option<oneshot::Sender<Result<Id, JoinError>>>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl SessionLoop {
    pub fn new(
        config: SessionConfig,
        channel: MessageChannel,
        command_rx: mpsc::UnboundedReceiver<Command>,
        state: SharedSessionState,
        session_id: Arc<OnceLock<Id>>,
    ) -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        Self {
            config,
            channel,
            command_rx,
            reply_tx,
            reply_rx,
            state,
            session_id,
            ids: RequestIdSequence::default(),
            pending: PendingRequests::default(),
            handlers: HandlerTable::default(),
            invocations: HashMap::default(),
            deadlines: JoinSet::new(),
            join_tx: None,
            close_tx: None,
        }
    }

    pub async fn run(mut self) {
        let exit = match AssertUnwindSafe(self.session_loop()).catch_unwind().await {
            Ok(Ok(exit)) => exit,
            Ok(Err(err)) => {
                error!("Session {} failed: {err:#}", self.config.name);
                LoopExit::Failed
            }
            Err(panic) => {
                error!(
                    "Session {} loop panicked: {}",
                    self.config.name,
                    panic_message(panic.as_ref())
                );
                LoopExit::Failed
            }
        };
        self.teardown(exit).await;
    }

    async fn session_loop(&mut self) -> Result<LoopExit> {
        loop {
            tokio::select! {
                inbound = self.channel.recv() => {
                    match inbound {
                        Some(Ok(Inbound::Ping(data))) => {
                            self.channel.pong(data).await?;
                        }
                        Some(Ok(Inbound::Message(message))) => {
                            if let Some(exit) = self.handle_message(message).await? {
                                return Ok(exit);
                            }
                        }
                        Some(Err(err)) => {
                            self.send(OutgoingMessage::protocol_violation("invalid message"))
                                .await
                                .ok();
                            return Err(err);
                        }
                        None => {
                            if self.close_tx.is_some() {
                                return Ok(LoopExit::Closed);
                            }
                            return Err(Error::msg("transport closed unexpectedly"));
                        }
                    }
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if let Some(exit) = self.handle_command(command).await? {
                                return Ok(exit);
                            }
                        }
                        None => {
                            debug!("Session {} dropped by its owner", self.config.name);
                            if self.state.get() == SessionState::Joined {
                                self.send(OutgoingMessage::goodbye(CloseReason::Normal))
                                    .await
                                    .ok();
                            }
                            return Ok(LoopExit::Closed);
                        }
                    }
                }
                Some(reply) = self.reply_rx.recv() => {
                    self.handle_invocation_reply(reply).await?;
                }
                Some(expired) = self.deadlines.join_next(), if !self.deadlines.is_empty() => {
                    // Aborted deadlines belong to invocations that were already replied to.
                    if let Ok(request) = expired {
                        self.expire_invocation(request).await?;
                    }
                }
            }
        }
    }

    async fn teardown(&mut self, exit: LoopExit) {
        match exit {
            LoopExit::Closed => {
                if self.state.transition(SessionState::Closed).is_err() {
                    self.state.fail();
                }
            }
            LoopExit::Failed => self.state.fail(),
        }
        info!(
            "Session {} finished in state {}",
            self.config.name,
            self.state.get()
        );

        for (request, pending) in self.pending.drain() {
            debug!(
                "Session {} dropped pending {} request {request}",
                self.config.name,
                pending.kind().name()
            );
        }
        if let Some(join_tx) = self.join_tx.take() {
            join_tx.send(Err(JoinError::SessionLost)).ok();
        }
        self.deadlines.abort_all();
        self.invocations.clear();

        if let Err(err) = self.channel.close().await {
            debug!(
                "Session {} failed to close transport: {err:#}",
                self.config.name
            );
        }
        if let Some(close_tx) = self.close_tx.take() {
            close_tx.send(()).ok();
        }
    }

    async fn send(&mut self, message: OutgoingMessage) -> Result<()> {
        trace!(
            "Session {} sending {} message",
            self.config.name,
            message.name()
        );
        self.channel.send(&message).await
    }

    async fn protocol_violation(&mut self, message: &str) -> Error {
        self.send(OutgoingMessage::protocol_violation(message))
            .await
            .ok();
        Error::msg(format!("protocol violation: {message}"))
    }

    fn hello_details(&self) -> Dictionary {
        let roles = self
            .config
            .roles
            .iter()
            .map(|role| (role.name().to_owned(), Value::Dictionary(Dictionary::default())));
        Dictionary::from_iter([
            ("agent".to_owned(), Value::String(self.config.agent.clone())),
            ("roles".to_owned(), Value::Dictionary(Dictionary::from_iter(roles))),
        ])
    }

    async fn handle_command(&mut self, command: Command) -> Result<Option<LoopExit>> {
        let state = self.state.get();
        let accepting_requests = state == SessionState::Joined && self.close_tx.is_none();
        match command {
            Command::Join { realm, result_tx } => {
                if state != SessionState::Starting || self.join_tx.is_some() {
                    result_tx.send(Err(JoinError::InvalidState(state))).ok();
                    return Ok(None);
                }
                info!("Session {} joining realm {realm}", self.config.name);
                let details = self.hello_details();
                self.join_tx = Some(result_tx);
                self.send(OutgoingMessage::Hello(HelloMessage { realm, details }))
                    .await?;
            }
            Command::Subscribe { result_tx, .. }
            | Command::Publish { result_tx, .. }
            | Command::Register { result_tx, .. }
                if !accepting_requests =>
            {
                result_tx.send(Err(RequestError::NotJoined(state))).ok();
            }
            Command::Call { result_tx, .. } if !accepting_requests => {
                result_tx.send(Err(CallError::NotJoined(state))).ok();
            }
            Command::Subscribe {
                topic,
                handler,
                result_tx,
            } => {
                let request = self.ids.next_request();
                let message = OutgoingMessage::Subscribe(SubscribeMessage {
                    request,
                    options: Dictionary::default(),
                    topic: topic.clone(),
                });
                self.pending.insert(
                    request,
                    PendingRequest::Subscribe {
                        topic,
                        handler,
                        result_tx,
                    },
                )?;
                self.send(message).await?;
            }
            Command::Publish {
                topic,
                arguments,
                result_tx,
            } => {
                let request = self.ids.next_request();
                let message = OutgoingMessage::Publish(PublishMessage {
                    request,
                    options: Dictionary::from_iter([(
                        "acknowledge".to_owned(),
                        Value::Bool(true),
                    )]),
                    topic,
                    arguments,
                    arguments_keyword: Dictionary::default(),
                });
                self.pending
                    .insert(request, PendingRequest::Publish { result_tx })?;
                self.send(message).await?;
            }
            Command::Register {
                procedure,
                handler,
                result_tx,
            } => {
                let request = self.ids.next_request();
                let message = OutgoingMessage::Register(RegisterMessage {
                    request,
                    options: Dictionary::default(),
                    procedure: procedure.clone(),
                });
                self.pending.insert(
                    request,
                    PendingRequest::Register {
                        procedure,
                        handler,
                        result_tx,
                    },
                )?;
                self.send(message).await?;
            }
            Command::Call {
                procedure,
                arguments,
                result_tx,
            } => {
                let request = self.ids.next_request();
                let message = OutgoingMessage::Call(CallMessage {
                    request,
                    options: Dictionary::default(),
                    procedure: procedure.clone(),
                    arguments,
                    arguments_keyword: Dictionary::default(),
                });
                self.pending.insert(
                    request,
                    PendingRequest::Call {
                        procedure,
                        result_tx,
                    },
                )?;
                self.send(message).await?;
            }
            Command::Close { done_tx } => {
                self.close_tx = Some(done_tx);
                if state != SessionState::Joined {
                    return Ok(Some(LoopExit::Closed));
                }
                info!("Session {} leaving realm", self.config.name);
                self.send(OutgoingMessage::goodbye(CloseReason::Normal))
                    .await?;
            }
        }
        Ok(None)
    }

    async fn handle_message(&mut self, message: IncomingMessage) -> Result<Option<LoopExit>> {
        trace!(
            "Session {} received {} message",
            self.config.name,
            message.name()
        );
        match message {
            IncomingMessage::Welcome(welcome) => {
                let join_tx = match self.join_tx.take() {
                    Some(join_tx) => join_tx,
                    None => return Err(self.protocol_violation("unexpected WELCOME").await),
                };
                if self.session_id.set(welcome.session).is_err() {
                    return Err(self.protocol_violation("session already joined").await);
                }
                self.state
                    .transition(SessionState::Joined)
                    .map_err(|state| Error::msg(format!("cannot join while {state}")))?;
                info!(
                    "Session {} joined with session id {}",
                    self.config.name, welcome.session
                );
                join_tx.send(Ok(welcome.session)).ok();
            }
            IncomingMessage::Abort(ref abort) => {
                let err = RemoteError::from(abort);
                match self.join_tx.take() {
                    Some(join_tx) => {
                        warn!("Session {} failed to join: {err}", self.config.name);
                        join_tx.send(Err(JoinError::Rejected(err))).ok();
                    }
                    None => error!("Session {} aborted by router: {err}", self.config.name),
                }
                return Ok(Some(LoopExit::Failed));
            }
            IncomingMessage::Goodbye(ref goodbye) => {
                if self.close_tx.is_some() {
                    debug!("Session {} goodbye acknowledged", self.config.name);
                } else {
                    info!(
                        "Session {} ended by router: {}",
                        self.config.name, goodbye.reason
                    );
                    self.send(OutgoingMessage::goodbye(CloseReason::GoodbyeAndOut))
                        .await?;
                }
                return Ok(Some(LoopExit::Closed));
            }
            IncomingMessage::Subscribed(ref subscribed) => {
                match self.pending.take(subscribed.request) {
                    Some(PendingRequest::Subscribe {
                        topic,
                        handler,
                        result_tx,
                    }) => {
                        debug!(
                            "Session {} subscribed to {topic} with subscription {}",
                            self.config.name, subscribed.subscription
                        );
                        self.handlers
                            .add_subscription(subscribed.subscription, topic, handler);
                        result_tx.send(Ok(subscribed.subscription)).ok();
                    }
                    pending => return self.unexpected_response(&message, pending).await,
                }
            }
            IncomingMessage::Published(ref published) => {
                match self.pending.take(published.request) {
                    Some(PendingRequest::Publish { result_tx }) => {
                        result_tx.send(Ok(published.publication)).ok();
                    }
                    pending => return self.unexpected_response(&message, pending).await,
                }
            }
            IncomingMessage::Registered(ref registered) => {
                match self.pending.take(registered.request) {
                    Some(PendingRequest::Register {
                        procedure,
                        handler,
                        result_tx,
                    }) => {
                        debug!(
                            "Session {} registered {procedure} with registration {}",
                            self.config.name, registered.registration
                        );
                        self.handlers
                            .add_registration(registered.registration, procedure, handler);
                        result_tx.send(Ok(registered.registration)).ok();
                    }
                    pending => return self.unexpected_response(&message, pending).await,
                }
            }
            IncomingMessage::Result(ref result) => match self.pending.take(result.request) {
                Some(PendingRequest::Call { result_tx, .. }) => {
                    result_tx
                        .send(Ok(CallResult {
                            arguments: result.arguments.clone(),
                            arguments_keyword: result.arguments_keyword.clone(),
                        }))
                        .ok();
                }
                pending => return self.unexpected_response(&message, pending).await,
            },
            IncomingMessage::Error(ref error) => match self.pending.take(error.request) {
                Some(pending) if pending.kind() == error.request_kind => {
                    self.reject_request(error, pending);
                }
                pending => return self.unexpected_response(&message, pending).await,
            },
            IncomingMessage::Event(event) => self.handle_event(event),
            IncomingMessage::Invocation(invocation) => self.handle_invocation(invocation).await?,
        }
        Ok(None)
    }

    fn reject_request(&self, error: &ErrorMessage, pending: PendingRequest) {
        let err = RemoteError::from(error);
        match pending {
            PendingRequest::Subscribe { result_tx, .. }
            | PendingRequest::Publish { result_tx }
            | PendingRequest::Register { result_tx, .. } => {
                result_tx.send(Err(RequestError::Rejected(err))).ok();
            }
            PendingRequest::Call {
                procedure,
                result_tx,
            } => {
                debug!(
                    "Session {} call to {procedure} failed: {err}",
                    self.config.name
                );
                result_tx.send(Err(CallError::Remote(err))).ok();
            }
        }
    }

    /// Handles a response that does not match any pending request.
    ///
    /// Responses to unknown requests are ignored. A response of the wrong kind for a pending
    /// request breaks the protocol.
    async fn unexpected_response(
        &mut self,
        message: &IncomingMessage,
        pending: Option<PendingRequest>,
    ) -> Result<Option<LoopExit>> {
        let responds_to = match message {
            IncomingMessage::Error(error) => format!("{} error", error.request_kind.name()),
            message => message.name().to_owned(),
        };
        match pending {
            None => {
                warn!(
                    "Session {} received {responds_to} for unknown request {:?}",
                    self.config.name,
                    message.answers()
                );
                Ok(None)
            }
            Some(pending) => Err(self
                .protocol_violation(&format!(
                    "received {responds_to} for {} request",
                    pending.kind().name()
                ))
                .await),
        }
    }

    fn handle_event(&self, event: EventMessage) {
        let (topic, handlers) = match self.handlers.event_handlers(event.subscription) {
            Some(found) => found,
            None => {
                warn!(
                    "Session {} received event for unknown subscription {}",
                    self.config.name, event.subscription
                );
                return;
            }
        };
        for handler in handlers {
            let context = EventContext {
                topic: topic.clone(),
                publication: event.publication,
                arguments: event.arguments.clone(),
                arguments_keyword: event.arguments_keyword.clone(),
            };
            // A panicking handler loses its event, but the session and other handlers carry on.
            if let Err(panic) =
                std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle_event(context)))
            {
                error!(
                    "Session {} event handler for {topic} panicked: {}",
                    self.config.name,
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    async fn handle_invocation(&mut self, invocation: InvocationMessage) -> Result<()> {
        let (procedure, handler) = match self.handlers.invocation_handler(invocation.registration)
        {
            Some((procedure, handler)) => (procedure.clone(), handler.clone()),
            None => {
                warn!(
                    "Session {} received invocation for unknown registration {}",
                    self.config.name, invocation.registration
                );
                return self
                    .send(OutgoingMessage::invocation_error(
                        invocation.request,
                        Uri::for_wamp_error("no_such_registration"),
                        "no such registration",
                    ))
                    .await;
            }
        };

        let request = invocation.request;
        let completion = CompletionFlag::default();
        let deadline = self.config.invocation_timeout.map(|timeout| {
            self.deadlines.spawn(async move {
                tokio::time::sleep(timeout).await;
                request
            })
        });
        self.invocations.insert(
            request,
            OpenInvocation {
                completion: completion.clone(),
                deadline,
            },
        );
        debug!(
            "Session {} invoking {procedure} for request {request}",
            self.config.name
        );
        let context = InvocationContext::new(
            procedure.clone(),
            request,
            invocation.arguments,
            invocation.arguments_keyword,
            completion,
            self.reply_tx.clone(),
        );
        // Unwinding drops the context, which replies to the caller with a runtime error.
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler.invoke(context))) {
            error!(
                "Session {} invocation handler for {procedure} panicked: {}",
                self.config.name,
                panic_message(panic.as_ref())
            );
        }
        Ok(())
    }

    async fn handle_invocation_reply(&mut self, reply: InvocationReply) -> Result<()> {
        if let Some(open) = self.invocations.remove(&reply.request) {
            if let Some(deadline) = open.deadline {
                deadline.abort();
            }
        }
        self.send(reply.message).await
    }

    async fn expire_invocation(&mut self, request: Id) -> Result<()> {
        let open = match self.invocations.remove(&request) {
            Some(open) => open,
            None => return Ok(()),
        };
        if !open.completion.complete() {
            return Ok(());
        }
        warn!(
            "Session {} timed out invocation {request}",
            self.config.name
        );
        self.send(OutgoingMessage::invocation_error(
            request,
            Uri::for_wamp_error("timeout"),
            "invocation timed out",
        ))
        .await
    }
}
