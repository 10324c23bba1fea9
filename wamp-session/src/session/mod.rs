mod context;
mod handlers;
mod pending;
mod session;
mod session_loop;
mod state;

pub use context::{
    CallResult,
    EventContext,
    EventHandler,
    InvocationContext,
    InvocationHandler,
};
pub use session::{
    Session,
    SessionConfig,
    WebSocketSession,
    new_web_socket_session,
};
pub use state::SessionState;
