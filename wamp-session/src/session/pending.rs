use std::{
    fmt::Debug,
    sync::Arc,
};

use ahash::HashMap;
use anyhow::{
    Error,
    Result,
};
use tokio::sync::oneshot;

use crate::{
    core::{
        error::{
            CallError,
            RequestError,
        },
        id::Id,
        uri::Uri,
    },
    message::message::RequestKind,
    session::context::{
        CallResult,
        EventHandler,
        InvocationHandler,
    },
};

/// A request waiting for a response from the router.
pub(crate) enum PendingRequest {
    Subscribe {
        topic: Uri,
        handler: Arc<dyn EventHandler>,
        result_tx: oneshot::Sender<Result<Id, RequestError>>,
    },
    Publish {
        result_tx: oneshot::Sender<Result<Id, RequestError>>,
    },
    Register {
        procedure: Uri,
        handler: Arc<dyn InvocationHandler>,
        result_tx: oneshot::Sender<Result<Id, RequestError>>,
    },
    Call {
        procedure: Uri,
        result_tx: oneshot::Sender<Result<CallResult, CallError>>,
    },
}

impl PendingRequest {
    /// The kind of request sent to the router, which an ERROR response must name.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Subscribe { .. } => RequestKind::Subscribe,
            Self::Publish { .. } => RequestKind::Publish,
            Self::Register { .. } => RequestKind::Register,
            Self::Call { .. } => RequestKind::Call,
        }
    }
}

impl Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct(self.kind().name());
        match self {
            Self::Subscribe { topic, .. } => debug.field("topic", topic),
            Self::Register { procedure, .. } | Self::Call { procedure, .. } => {
                debug.field("procedure", procedure)
            }
            Self::Publish { .. } => &mut debug,
        };
        debug.finish_non_exhaustive()
    }
}

/// Requests awaiting a response, keyed by request ID.
///
/// Every entry is removed exactly once, when its response arrives or when the session is torn
/// down.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    requests: HashMap<Id, PendingRequest>,
}

impl PendingRequests {
    pub fn insert(&mut self, request: Id, pending: PendingRequest) -> Result<()> {
        if self.requests.contains_key(&request) {
            return Err(Error::msg(format!("request {request} is already pending")));
        }
        self.requests.insert(request, pending);
        Ok(())
    }

    pub fn take(&mut self, request: Id) -> Option<PendingRequest> {
        self.requests.remove(&request)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Removes every pending request.
    ///
    /// Dropping a request's result channel tells its caller the session was lost.
    pub fn drain(&mut self) -> impl Iterator<Item = (Id, PendingRequest)> + '_ {
        self.requests.drain()
    }
}
