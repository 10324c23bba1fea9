use std::{
    sync::Arc,
    time::Duration,
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
use tokio::{
    sync::broadcast,
    task::{
        JoinHandle,
        JoinSet,
    },
    time::Instant,
};

use crate::{
    core::{
        types::{
            Integer,
            List,
            Value,
            list_from_values,
        },
        uri::Uri,
    },
    driver::messenger::Messenger,
};

/// Configuration for a [`PeriodicDriver`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Name of the driver, mostly for logging.
    pub name: String,
    /// Time between ticks. Must not be zero.
    pub interval: Duration,
    /// Topic the counter is published to on every tick.
    pub topic: Uri,
    /// Procedure called on every tick.
    pub procedure: Uri,
    /// Second argument of every call, after the counter.
    pub multiplier: Integer,
    /// Maximum number of calls awaiting a result at once.
    ///
    /// A tick that would exceed the bound skips its call.
    pub max_in_flight_calls: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "driver".to_owned(),
            interval: Duration::from_secs(1),
            topic: Uri::from_known("com.example.oncounter"),
            procedure: Uri::from_known("com.example.mul2"),
            multiplier: 3,
            max_in_flight_calls: 1,
        }
    }
}

/// A handle to a running [`PeriodicDriver`].
///
/// Dropping the handle stops the driver.
pub struct DriverHandle {
    join_handle: JoinHandle<Result<u64>>,
    cancel_tx: broadcast::Sender<()>,
}

impl DriverHandle {
    /// Stops the driver after its current tick.
    pub fn cancel(&self) -> Result<()> {
        self.cancel_tx.send(()).map(|_| ()).map_err(Error::new)
    }

    /// Waits for the driver to stop, returning the number of ticks it completed.
    pub async fn join(self) -> Result<u64> {
        self.join_handle.await.map_err(Error::new)?
    }
}

/// Publishes an incrementing counter and calls a procedure at a fixed rate.
///
/// Ticks are scheduled from the start time rather than from the end of the previous tick, so slow
/// ticks do not make the schedule drift. Calls run concurrently with later ticks, bounded by
/// [`DriverConfig::max_in_flight_calls`].
///
/// The driver stops when cancelled or when the session can no longer publish.
pub struct PeriodicDriver<M> {
    config: DriverConfig,
    messenger: Arc<M>,
    counter: Integer,
    ticks: u64,
    calls: JoinSet<()>,
}

impl<M> PeriodicDriver<M>
where
    M: Messenger + 'static,
{
    /// Creates a driver, failing if the configured interval is zero.
    pub fn new(config: DriverConfig, messenger: Arc<M>) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(Error::msg(format!(
                "driver {} interval must be greater than zero",
                config.name
            )));
        }
        Ok(Self {
            config,
            messenger,
            counter: 0,
            ticks: 0,
            calls: JoinSet::new(),
        })
    }

    /// Starts the driver on a new task.
    pub fn start(self) -> DriverHandle {
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let join_handle = tokio::spawn(self.run(cancel_rx));
        DriverHandle {
            join_handle,
            cancel_tx,
        }
    }

    /// Runs the driver until cancelled, returning the number of ticks completed.
    pub async fn run(mut self, mut cancel_rx: broadcast::Receiver<()>) -> Result<u64> {
        info!(
            "Driver {} publishing to {} and calling {} every {:?}",
            self.config.name, self.config.topic, self.config.procedure, self.config.interval
        );
        let mut next = Instant::now() + self.config.interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next) => {
                    if let Err(err) = self.tick().await {
                        error!("Driver {} stopped: {err:#}", self.config.name);
                        return Err(err);
                    }
                    next += self.config.interval;
                }
                Some(finished) = self.calls.join_next(), if !self.calls.is_empty() => {
                    if let Err(err) = finished {
                        error!("Driver {} call task failed: {err}", self.config.name);
                    }
                }
                _ = cancel_rx.recv() => {
                    info!("Driver {} cancelled after {} ticks", self.config.name, self.ticks);
                    break;
                }
            }
        }
        Ok(self.ticks)
    }

    async fn tick(&mut self) -> Result<()> {
        let counter = self.counter;
        match self
            .messenger
            .publish(
                self.config.topic.clone(),
                List::from_iter([Value::Integer(counter)]),
            )
            .await
        {
            Ok(publication) => info!(
                "Driver {} published counter {counter} to {} as publication {publication}",
                self.config.name, self.config.topic
            ),
            Err(err) if err.session_unavailable() => return Err(err.into()),
            Err(err) => warn!(
                "Driver {} failed to publish counter {counter}: {err}",
                self.config.name
            ),
        }
        self.counter += 1;
        self.ticks += 1;

        if self.calls.len() >= self.config.max_in_flight_calls {
            warn!(
                "Driver {} skipped call to {}: {} calls still in flight",
                self.config.name,
                self.config.procedure,
                self.calls.len()
            );
            return Ok(());
        }

        let name = self.config.name.clone();
        let messenger = self.messenger.clone();
        let procedure = self.config.procedure.clone();
        let arguments = list_from_values([self.counter, self.config.multiplier])?;
        self.calls.spawn(async move {
            match messenger.call(procedure.clone(), arguments).await {
                Ok(result) => match result.argument::<Integer>(0) {
                    Ok(value) => info!("Driver {name} call to {procedure} returned {value}"),
                    Err(err) => warn!("Driver {name} call to {procedure} returned bad result: {err}"),
                },
                Err(err) => warn!("Driver {name} call to {procedure} failed: {err}"),
            }
        });
        Ok(())
    }
}
