use std::{
    fmt::Display,
    sync::Arc,
};

use log::trace;
use tokio::sync::watch;

/// The lifecycle state of a [`Session`][`crate::session::Session`].
///
/// Transitions are strictly ordered. [`SessionState::Closed`] and [`SessionState::Failed`] are
/// terminal: a session is not reused after its transport ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Starting,
    Joined,
    Closed,
    Failed,
}

impl SessionState {
    /// Whether the session can never leave this state.
    pub fn terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    fn allowed_state_transition(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Disconnected, Self::Connecting) => true,
            (Self::Connecting, Self::Connected) => true,
            (Self::Connected, Self::Starting) => true,
            (Self::Starting, Self::Joined) => true,
            (Self::Disconnected | Self::Connected | Self::Starting | Self::Joined, Self::Closed) => {
                true
            }
            (state, Self::Failed) => !state.terminal(),
            _ => false,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Starting => "starting",
            Self::Joined => "joined",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The session state, shared between the public session object and its event loop.
#[derive(Debug, Clone)]
pub(crate) struct SharedSessionState {
    name: Arc<str>,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl SharedSessionState {
    pub fn new(name: &str) -> Self {
        let (state_tx, _) = watch::channel(SessionState::default());
        Self {
            name: name.into(),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Transitions to the next state.
    ///
    /// Returns the current state as an error if the transition is not allowed.
    pub fn transition(&self, next: SessionState) -> Result<(), SessionState> {
        let mut result = Ok(());
        self.state_tx.send_if_modified(|state| {
            if !state.allowed_state_transition(&next) {
                result = Err(*state);
                return false;
            }
            trace!("Session {} transitioned from {state} to {next}", self.name);
            *state = next;
            true
        });
        result
    }

    /// Moves the session to [`SessionState::Failed`], unless it already finished.
    pub fn fail(&self) {
        self.transition(SessionState::Failed).ok();
    }
}
