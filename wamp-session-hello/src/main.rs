//! Demonstration client for `wamp-session`.
//!
//! Joins a realm, listens on `com.example.onhello`, provides `com.example.add2`, and then
//! periodically publishes a counter and calls `com.example.mul2` until interrupted.

mod config;

use std::{
    process::ExitCode,
    sync::Arc,
};

use anyhow::{
    Error,
    Result,
};
use log::{
    error,
    info,
    warn,
};
use tracing_subscriber::EnvFilter;
use wamp_session::{
    core::{
        types::{
            Integer,
            List,
            Value,
        },
        uri::Uri,
    },
    driver::{
        DriverConfig,
        PeriodicDriver,
    },
    session::{
        EventContext,
        InvocationContext,
        SessionConfig,
        new_web_socket_session,
    },
};

use crate::config::HelloConfig;

fn on_hello(event: EventContext) {
    match event.argument::<String>(0) {
        Ok(message) => info!("Event for {} received: {message}", event.topic),
        Err(err) => warn!("Event for {} has no message: {err}", event.topic),
    }
}

fn add2(invocation: InvocationContext) {
    let sum = match (
        invocation.argument::<Integer>(0),
        invocation.argument::<Integer>(1),
    ) {
        (Ok(a), Ok(b)) => a.wrapping_add(b),
        (Err(err), _) | (_, Err(err)) => {
            warn!("Rejecting call to {}: {err}", invocation.procedure());
            if let Err(err) = invocation.error(
                Uri::for_wamp_error("invalid_argument"),
                &err.to_string(),
            ) {
                warn!("Failed to reply to invocation: {err}");
            }
            return;
        }
    };
    info!("Procedure {} called, returning {sum}", invocation.procedure());
    if let Err(err) = invocation.result(List::from_iter([Value::Integer(sum)])) {
        warn!("Failed to reply to invocation: {err}");
    }
}

async fn run(config: HelloConfig) -> Result<()> {
    let session = Arc::new(new_web_socket_session(SessionConfig {
        name: "hello".to_owned(),
        ..Default::default()
    })?);

    session.connect(&config.endpoint).await?;
    session.start().await?;
    let session_id = session.join(&config.realm).await?;
    info!(
        "Joined realm {} with session id {session_id}",
        config.realm
    );

    session
        .subscribe(Uri::try_from("com.example.onhello")?, on_hello)
        .await?;
    info!("Subscribed to com.example.onhello");

    session
        .register(Uri::try_from("com.example.add2")?, add2)
        .await?;
    info!("Registered com.example.add2");

    let driver = PeriodicDriver::new(
        DriverConfig {
            name: "hello".to_owned(),
            interval: config.interval,
            ..Default::default()
        },
        session.clone(),
    )?
    .start();

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            signal.map_err(Error::new)
        }
        state = session.wait_until_finished() => {
            Err(Error::msg(format!("session ended unexpectedly ({state})")))
        }
    };

    driver.cancel().ok();
    if let Err(err) = driver.join().await {
        warn!("Driver stopped with error: {err:#}");
    }
    session.close().await?;
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(HelloConfig::from_env()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
