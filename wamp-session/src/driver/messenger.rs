use async_trait::async_trait;

use crate::{
    core::{
        error::{
            CallError,
            RequestError,
        },
        id::Id,
        types::List,
        uri::Uri,
    },
    session::{
        CallResult,
        Session,
    },
};

/// The outgoing half of a joined session, as used by a
/// [`PeriodicDriver`][`crate::driver::PeriodicDriver`].
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Publishes an event to a topic.
    async fn publish(&self, topic: Uri, arguments: List) -> Result<Id, RequestError>;

    /// Calls a procedure.
    async fn call(&self, procedure: Uri, arguments: List) -> Result<CallResult, CallError>;
}

#[async_trait]
impl<S> Messenger for Session<S>
where
    S: Send + 'static,
{
    async fn publish(&self, topic: Uri, arguments: List) -> Result<Id, RequestError> {
        Session::publish(self, topic, arguments).await
    }

    async fn call(&self, procedure: Uri, arguments: List) -> Result<CallResult, CallError> {
        Session::call(self, procedure, arguments).await
    }
}
