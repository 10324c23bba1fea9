use std::sync::{
    Arc,
    atomic::{
        AtomicBool,
        Ordering,
    },
};

use log::{
    debug,
    warn,
};
use tokio::sync::mpsc;

use crate::{
    core::{
        error::{
            ArgumentError,
            InvocationError,
        },
        id::Id,
        types::{
            Dictionary,
            List,
            WampDeserialize,
        },
        uri::Uri,
    },
    message::outgoing::OutgoingMessage,
};

/// Reads a positional argument as `T`.
fn argument_at<T>(arguments: &List, index: usize) -> Result<T, ArgumentError>
where
    T: WampDeserialize,
{
    let value = arguments.get(index).ok_or(ArgumentError::OutOfRange {
        index,
        len: arguments.len(),
    })?;
    T::wamp_deserialize(value.clone())
        .map_err(|source| ArgumentError::TypeMismatch { index, source })
}

/// An event received on a subscribed topic.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub topic: Uri,
    pub publication: Id,
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

impl EventContext {
    /// Reads the positional argument at `index`.
    pub fn argument<T>(&self, index: usize) -> Result<T, ArgumentError>
    where
        T: WampDeserialize,
    {
        argument_at(&self.arguments, index)
    }
}

/// The result of a completed procedure call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub arguments: List,
    pub arguments_keyword: Dictionary,
}

impl CallResult {
    /// Reads the positional result at `index`.
    pub fn argument<T>(&self, index: usize) -> Result<T, ArgumentError>
    where
        T: WampDeserialize,
    {
        argument_at(&self.arguments, index)
    }
}

/// A reply to an invocation, sent from an [`InvocationContext`] back to the session loop.
#[derive(Debug)]
pub(crate) struct InvocationReply {
    pub request: Id,
    pub message: OutgoingMessage,
}

/// Shared completion flag of a single invocation.
///
/// The first party to flip the flag owns the reply.
#[derive(Debug, Default, Clone)]
pub(crate) struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    /// Marks the invocation complete, returning `false` if it was already complete.
    pub fn complete(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn completed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// An invocation of a registered procedure, which must be completed exactly once.
///
/// The context may be moved into another task and completed later. Dropping it without completing
/// replies to the caller with `wamp.error.canceled`.
#[derive(Debug)]
pub struct InvocationContext {
    procedure: Uri,
    request: Id,
    arguments: List,
    arguments_keyword: Dictionary,
    completion: CompletionFlag,
    reply_tx: mpsc::UnboundedSender<InvocationReply>,
}

impl InvocationContext {
    pub(crate) fn new(
        procedure: Uri,
        request: Id,
        arguments: List,
        arguments_keyword: Dictionary,
        completion: CompletionFlag,
        reply_tx: mpsc::UnboundedSender<InvocationReply>,
    ) -> Self {
        Self {
            procedure,
            request,
            arguments,
            arguments_keyword,
            completion,
            reply_tx,
        }
    }

    pub fn procedure(&self) -> &Uri {
        &self.procedure
    }

    /// The request ID of the invocation, assigned by the router.
    pub fn request(&self) -> Id {
        self.request
    }

    pub fn arguments(&self) -> &List {
        &self.arguments
    }

    pub fn arguments_keyword(&self) -> &Dictionary {
        &self.arguments_keyword
    }

    /// Reads the positional argument at `index`.
    pub fn argument<T>(&self, index: usize) -> Result<T, ArgumentError>
    where
        T: WampDeserialize,
    {
        argument_at(&self.arguments, index)
    }

    /// Whether the invocation was already completed, including by its deadline expiring.
    pub fn completed(&self) -> bool {
        self.completion.completed()
    }

    /// Completes the invocation with a result.
    pub fn result(self, arguments: List) -> Result<(), InvocationError> {
        self.result_with_keywords(arguments, Dictionary::default())
    }

    /// Completes the invocation with a result including keyword arguments.
    pub fn result_with_keywords(
        self,
        arguments: List,
        arguments_keyword: Dictionary,
    ) -> Result<(), InvocationError> {
        self.complete(OutgoingMessage::invocation_result(
            self.request,
            arguments,
            arguments_keyword,
        ))
    }

    /// Completes the invocation with an error.
    pub fn error(self, error: Uri, message: &str) -> Result<(), InvocationError> {
        self.complete(OutgoingMessage::invocation_error(self.request, error, message))
    }

    fn complete(&self, message: OutgoingMessage) -> Result<(), InvocationError> {
        if !self.completion.complete() {
            debug!(
                "Invocation {} of {} was already completed",
                self.request, self.procedure
            );
            return Err(InvocationError::AlreadyCompleted);
        }
        self.reply_tx
            .send(InvocationReply {
                request: self.request,
                message,
            })
            .map_err(|_| InvocationError::SessionLost)
    }
}

impl Drop for InvocationContext {
    fn drop(&mut self) {
        if self.completion.completed() {
            return;
        }
        let message = if std::thread::panicking() {
            warn!(
                "Invocation {} of {} panicked before replying",
                self.request, self.procedure
            );
            OutgoingMessage::invocation_error(
                self.request,
                Uri::for_wamp_error("runtime_error"),
                "invocation handler panicked",
            )
        } else {
            warn!(
                "Invocation {} of {} was dropped without a reply",
                self.request, self.procedure
            );
            OutgoingMessage::invocation_error(
                self.request,
                Uri::for_wamp_error("canceled"),
                "invocation dropped without a reply",
            )
        };
        self.complete(message).ok();
    }
}

/// A handler for events published to a subscribed topic.
///
/// Handlers run on the session loop, so they must not block. Long-running work should be moved
/// to a separate task.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: EventContext);
}

impl<F> EventHandler for F
where
    F: Fn(EventContext) + Send + Sync,
{
    fn handle_event(&self, event: EventContext) {
        self(event)
    }
}

/// A handler for invocations of a registered procedure.
///
/// Handlers run on the session loop. The [`InvocationContext`] can be moved elsewhere to complete
/// the invocation asynchronously.
pub trait InvocationHandler: Send + Sync {
    fn invoke(&self, invocation: InvocationContext);
}

impl<F> InvocationHandler for F
where
    F: Fn(InvocationContext) + Send + Sync,
{
    fn invoke(&self, invocation: InvocationContext) {
        self(invocation)
    }
}

#[cfg(test)]
mod context_test {
    use tokio::sync::mpsc;

    use crate::{
        core::{
            error::{
                ArgumentError,
                InvocationError,
            },
            id::Id,
            types::{
                Dictionary,
                List,
                Value,
            },
            uri::Uri,
        },
        message::{
            message::{
                ErrorMessage,
                RequestKind,
                YieldMessage,
            },
            outgoing::OutgoingMessage,
        },
        session::context::{
            CompletionFlag,
            InvocationContext,
        },
    };

    fn invocation(
        arguments: List,
    ) -> (
        InvocationContext,
        mpsc::UnboundedReceiver<super::InvocationReply>,
    ) {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let context = InvocationContext::new(
            Uri::try_from("com.example.add2").unwrap(),
            Id::try_from(9).unwrap(),
            arguments,
            Dictionary::default(),
            CompletionFlag::default(),
            reply_tx,
        );
        (context, reply_rx)
    }

    #[test]
    fn reads_typed_arguments() {
        let (context, _reply_rx) = invocation(List::from_iter([
            Value::Integer(2),
            Value::String("three".to_owned()),
        ]));
        assert_matches::assert_matches!(context.argument::<u64>(0), Ok(2));
        assert_matches::assert_matches!(context.argument::<String>(1), Ok(value) => {
            assert_eq!(value, "three");
        });
        assert_matches::assert_matches!(
            context.argument::<u64>(1),
            Err(ArgumentError::TypeMismatch { index: 1, .. })
        );
        assert_matches::assert_matches!(
            context.argument::<u64>(2),
            Err(ArgumentError::OutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn result_sends_yield() {
        let (context, mut reply_rx) = invocation(List::default());
        assert_matches::assert_matches!(context.result(List::from_iter([Value::Integer(5)])), Ok(()));
        let reply = reply_rx.try_recv().unwrap();
        assert_eq!(reply.request, Id::try_from(9).unwrap());
        pretty_assertions::assert_eq!(
            reply.message,
            OutgoingMessage::Yield(YieldMessage {
                request: Id::try_from(9).unwrap(),
                options: Dictionary::default(),
                arguments: List::from_iter([Value::Integer(5)]),
                arguments_keyword: Dictionary::default(),
            })
        );
        assert_matches::assert_matches!(reply_rx.try_recv(), Err(_));
    }

    #[test]
    fn completes_only_once() {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        let completion = CompletionFlag::default();
        let context = InvocationContext::new(
            Uri::try_from("com.example.add2").unwrap(),
            Id::try_from(9).unwrap(),
            List::default(),
            Dictionary::default(),
            completion.clone(),
            reply_tx,
        );

        // Some other party, such as a deadline, completes the invocation first.
        assert!(completion.complete());
        assert!(context.completed());
        assert_matches::assert_matches!(
            context.result(List::default()),
            Err(InvocationError::AlreadyCompleted)
        );
        assert_matches::assert_matches!(reply_rx.try_recv(), Err(_));
    }

    #[test]
    fn drop_without_reply_sends_canceled() {
        let (context, mut reply_rx) = invocation(List::default());
        drop(context);
        let reply = reply_rx.try_recv().unwrap();
        assert_matches::assert_matches!(reply.message, OutgoingMessage::Error(ErrorMessage { request_kind, error, .. }) => {
            assert_eq!(request_kind, RequestKind::Invocation);
            assert_eq!(error.as_ref(), "wamp.error.canceled");
        });
    }

    #[test]
    fn panic_while_holding_context_sends_runtime_error() {
        let (context, mut reply_rx) = invocation(List::default());
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _context = context;
            panic!("handler bug");
        }));
        assert!(panicked.is_err());
        let reply = reply_rx.try_recv().unwrap();
        assert_matches::assert_matches!(reply.message, OutgoingMessage::Error(ErrorMessage { error, .. }) => {
            assert_eq!(error.as_ref(), "wamp.error.runtime_error");
        });
        assert_matches::assert_matches!(reply_rx.try_recv(), Err(_));
    }

    #[test]
    fn reports_session_lost() {
        let (context, reply_rx) = invocation(List::default());
        drop(reply_rx);
        assert_matches::assert_matches!(
            context.error(Uri::try_from("com.example.error").unwrap(), "failed"),
            Err(InvocationError::SessionLost)
        );
    }
}
