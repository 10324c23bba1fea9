use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

use tokio::sync::{
    mpsc,
    oneshot,
};
use wamp_session::{
    core::{
        endpoint::Endpoint,
        error::{
            CallError,
            InvocationError,
            RequestError,
        },
        types::{
            Integer,
            List,
            Value,
        },
        uri::Uri,
    },
    session::{
        InvocationContext,
        SessionConfig,
        SessionState,
        WebSocketSession,
        new_web_socket_session,
    },
};
use test_utils::router::{
    RouterConfig,
    RouterHandle,
    start_router,
};

const REALM: &str = "realm1";

async fn joined_session_with_config(
    router_handle: &RouterHandle,
    config: SessionConfig,
) -> WebSocketSession {
    let session = new_web_socket_session(config).unwrap();
    session
        .connect(&Endpoint::from(router_handle.local_addr()))
        .await
        .unwrap();
    session.start().await.unwrap();
    session.join(REALM).await.unwrap();
    session
}

async fn joined_session(router_handle: &RouterHandle, name: &str) -> WebSocketSession {
    let config = SessionConfig {
        name: name.to_owned(),
        ..Default::default()
    };
    joined_session_with_config(router_handle, config).await
}

fn add2(invocation: InvocationContext) {
    let sum = match (
        invocation.argument::<Integer>(0),
        invocation.argument::<Integer>(1),
    ) {
        (Ok(a), Ok(b)) => a + b,
        (Err(err), _) | (_, Err(err)) => {
            invocation
                .error(
                    Uri::try_from("wamp.error.invalid_argument").unwrap(),
                    &err.to_string(),
                )
                .unwrap();
            return;
        }
    };
    invocation
        .result(List::from_iter([Value::Integer(sum)]))
        .unwrap();
}

fn arguments(values: &[Integer]) -> List {
    values.iter().copied().map(Value::Integer).collect()
}

#[tokio::test]
async fn caller_receives_result_from_callee() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let callee = joined_session(&router_handle, "callee").await;
    let caller = joined_session(&router_handle, "caller").await;

    assert_matches::assert_matches!(
        callee
            .register(Uri::try_from("com.example.add2").unwrap(), add2)
            .await,
        Ok(_)
    );

    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("com.example.add2").unwrap(), arguments(&[2, 3]))
            .await,
        Ok(result) => {
            assert_matches::assert_matches!(result.argument::<Integer>(0), Ok(5));
        }
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn caller_receives_callee_error() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let callee = joined_session(&router_handle, "callee").await;
    let caller = joined_session(&router_handle, "caller").await;

    callee
        .register(Uri::try_from("com.example.add2").unwrap(), add2)
        .await
        .unwrap();

    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("com.example.add2").unwrap(), arguments(&[2]))
            .await,
        Err(CallError::Remote(err)) => {
            assert_eq!(err.reason.as_ref(), "wamp.error.invalid_argument");
            assert_eq!(err.message, "argument 1 is out of range for 1 arguments");
        }
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn call_to_unregistered_procedure_fails() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let caller = joined_session(&router_handle, "caller").await;

    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("nonexistent.proc").unwrap(), List::default())
            .await,
        Err(err) => {
            assert_matches::assert_matches!(err.remote(), Some(remote) => {
                assert_eq!(remote.reason.as_ref(), "wamp.error.no_such_procedure");
            });
        }
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let first = joined_session(&router_handle, "first").await;
    let second = joined_session(&router_handle, "second").await;

    first
        .register(Uri::try_from("com.example.add2").unwrap(), add2)
        .await
        .unwrap();
    assert_matches::assert_matches!(
        second
            .register(Uri::try_from("com.example.add2").unwrap(), add2)
            .await,
        Err(RequestError::Rejected(err)) => {
            assert_eq!(err.reason.as_ref(), "wamp.error.procedure_already_exists");
        }
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn session_calls_its_own_procedure() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let session = joined_session(&router_handle, "loopback").await;

    session
        .register(Uri::try_from("com.example.add2").unwrap(), add2)
        .await
        .unwrap();
    assert_matches::assert_matches!(
        session
            .call(Uri::try_from("com.example.add2").unwrap(), arguments(&[20, 22]))
            .await,
        Ok(result) => {
            assert_matches::assert_matches!(result.argument::<Integer>(0), Ok(42));
        }
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn invocation_completes_asynchronously() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let callee = joined_session(&router_handle, "callee").await;
    let caller = joined_session(&router_handle, "caller").await;

    callee
        .register(
            Uri::try_from("com.example.mul2").unwrap(),
            |invocation: InvocationContext| {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let product = invocation.argument::<Integer>(0).unwrap()
                        * invocation.argument::<Integer>(1).unwrap();
                    invocation
                        .result(List::from_iter([Value::Integer(product)]))
                        .unwrap();
                });
            },
        )
        .await
        .unwrap();

    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("com.example.mul2").unwrap(), arguments(&[7, 3]))
            .await,
        Ok(result) => {
            assert_matches::assert_matches!(result.argument::<Integer>(0), Ok(21));
        }
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn open_invocation_times_out() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let callee = joined_session_with_config(
        &router_handle,
        SessionConfig {
            name: "slow-callee".to_owned(),
            invocation_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        },
    )
    .await;
    let caller = joined_session(&router_handle, "caller").await;

    let stashed = Arc::new(Mutex::new(None));
    callee
        .register(Uri::try_from("com.example.slow").unwrap(), {
            let stashed = stashed.clone();
            move |invocation: InvocationContext| {
                stashed.lock().unwrap().replace(invocation);
            }
        })
        .await
        .unwrap();

    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("com.example.slow").unwrap(), List::default())
            .await,
        Err(CallError::Remote(err)) => {
            assert_eq!(err.reason.as_ref(), "wamp.error.timeout");
        }
    );

    // The deadline won, so a late reply is refused.
    let invocation: InvocationContext = stashed.lock().unwrap().take().unwrap();
    assert!(invocation.completed());
    assert_matches::assert_matches!(
        invocation.result(List::default()),
        Err(InvocationError::AlreadyCompleted)
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn dropped_invocation_is_canceled() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let callee = joined_session(&router_handle, "callee").await;
    let caller = joined_session(&router_handle, "caller").await;

    callee
        .register(
            Uri::try_from("com.example.forgetful").unwrap(),
            |_: InvocationContext| {},
        )
        .await
        .unwrap();

    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("com.example.forgetful").unwrap(), List::default())
            .await,
        Err(CallError::Remote(err)) => {
            assert_eq!(err.reason.as_ref(), "wamp.error.canceled");
        }
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn pending_call_fails_when_session_is_lost() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let callee = joined_session(&router_handle, "callee").await;
    let caller = joined_session(&router_handle, "caller").await;

    let (invoked_tx, invoked_rx) = oneshot::channel();
    let invoked_tx = Mutex::new(Some(invoked_tx));
    let stashed = Arc::new(Mutex::new(Vec::new()));
    callee
        .register(Uri::try_from("com.example.slow").unwrap(), {
            let stashed = stashed.clone();
            move |invocation: InvocationContext| {
                stashed.lock().unwrap().push(invocation);
                if let Some(invoked_tx) = invoked_tx.lock().unwrap().take() {
                    invoked_tx.send(()).ok();
                }
            }
        })
        .await
        .unwrap();

    let call = tokio::spawn(async move {
        caller
            .call(Uri::try_from("com.example.slow").unwrap(), List::default())
            .await
    });
    invoked_rx.await.unwrap();
    router_handle.disconnect_sessions().await;

    assert_matches::assert_matches!(call.await, Ok(Err(CallError::SessionLost)));

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn panicking_invocation_handler_returns_runtime_error() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let callee = joined_session(&router_handle, "callee").await;
    let caller = joined_session(&router_handle, "caller").await;

    callee
        .register(
            Uri::try_from("com.example.square").unwrap(),
            |invocation: InvocationContext| {
                let value = invocation.argument::<Integer>(0).unwrap();
                invocation
                    .result(List::from_iter([Value::Integer(value * value)]))
                    .unwrap();
            },
        )
        .await
        .unwrap();
    callee
        .register(Uri::try_from("com.example.add2").unwrap(), add2)
        .await
        .unwrap();

    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("com.example.square").unwrap(), List::default())
            .await,
        Err(CallError::Remote(err)) => {
            assert_eq!(err.reason.as_ref(), "wamp.error.runtime_error");
            assert_eq!(err.message, "invocation handler panicked");
        }
    );

    // The callee keeps serving invocations.
    assert_eq!(callee.state(), SessionState::Joined);
    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("com.example.square").unwrap(), arguments(&[4]))
            .await,
        Ok(result) => {
            assert_matches::assert_matches!(result.argument::<Integer>(0), Ok(16));
        }
    );
    assert_matches::assert_matches!(
        caller
            .call(Uri::try_from("com.example.add2").unwrap(), arguments(&[2, 3]))
            .await,
        Ok(_)
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}

#[tokio::test]
async fn error_must_answer_request_of_same_kind() {
    test_utils::setup::setup_test_environment();

    let router_handle = start_router(RouterConfig::default()).await.unwrap();
    let callee = joined_session(&router_handle, "callee").await;
    let caller = Arc::new(joined_session(&router_handle, "caller").await);
    let caller_id = caller.session_id().unwrap().value();

    let (invoked_tx, mut invoked_rx) = mpsc::unbounded_channel();
    let stashed = Arc::new(Mutex::new(Vec::new()));
    callee
        .register(Uri::try_from("com.example.slow").unwrap(), {
            let stashed = stashed.clone();
            move |invocation: InvocationContext| {
                stashed.lock().unwrap().push(invocation);
                invoked_tx.send(()).unwrap();
            }
        })
        .await
        .unwrap();

    let call = |caller: Arc<WebSocketSession>| {
        tokio::spawn(async move {
            caller
                .call(Uri::try_from("com.example.slow").unwrap(), List::default())
                .await
        })
    };

    // The caller's first request is a CALL with request ID 1.
    let first = call(caller.clone());
    invoked_rx.recv().await.unwrap();
    router_handle
        .send_to_session(
            caller_id,
            serde_json::json!([8, 48, 1, {}, "com.example.error.busy"]),
        )
        .await;
    assert_matches::assert_matches!(first.await, Ok(Err(CallError::Remote(err))) => {
        assert_eq!(err.reason.as_ref(), "com.example.error.busy");
    });
    assert_eq!(caller.state(), SessionState::Joined);

    // An ERROR for request 2 that claims to answer a SUBSCRIBE breaks the protocol.
    let second = call(caller.clone());
    invoked_rx.recv().await.unwrap();
    router_handle
        .send_to_session(
            caller_id,
            serde_json::json!([8, 32, 2, {}, "wamp.error.not_authorized"]),
        )
        .await;
    assert_matches::assert_matches!(second.await, Ok(Err(CallError::SessionLost)));
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(5), caller.wait_until_finished())
            .await
            .unwrap(),
        SessionState::Failed
    );

    router_handle.cancel().unwrap();
    router_handle.join().await.unwrap();
}
