//! Signal generator controller.
//!
//! Publishes frequency (GHz), power (dBm) and RF output state on three latched status
//! topics and serves the matching command topics. A command runs set, settle, re-query
//! and publish as one unit; commands are handled one at a time by a single task.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::polling::{run_periodic, StopSignal, TaskHandle};
use crate::bus::{LocalBus, Message, MessageKind, Publisher, Subscription};
use crate::driver::{FrequencyUnit, OutputState, SignalGenerator};
use crate::error::AppResult;

/// Topic names used by one signal generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalGeneratorTopics {
    /// Frequency status (Float64, GHz)
    pub freq: String,
    /// Power status (Float64, dBm)
    pub power: String,
    /// Output status (Int32, 1 = on)
    pub onoff: String,
    /// Frequency command (Float64, GHz)
    pub freq_cmd: String,
    /// Power command (Float64, dBm)
    pub power_cmd: String,
    /// Output command (Int32, 1 = on)
    pub onoff_cmd: String,
}

impl SignalGeneratorTopics {
    /// Default names derived from `prefix`: `{prefix}_freq`, `{prefix}_freq_cmd`, ...
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            freq: format!("{}_freq", prefix),
            power: format!("{}_power", prefix),
            onoff: format!("{}_onoff", prefix),
            freq_cmd: format!("{}_freq_cmd", prefix),
            power_cmd: format!("{}_power_cmd", prefix),
            onoff_cmd: format!("{}_onoff_cmd", prefix),
        }
    }

    /// All six names, status topics first.
    pub fn all(&self) -> [&str; 6] {
        [
            &self.freq,
            &self.power,
            &self.onoff,
            &self.freq_cmd,
            &self.power_cmd,
            &self.onoff_cmd,
        ]
    }
}

/// A setpoint received on a command topic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// CW frequency in GHz
    Frequency(f64),
    /// Output power in dBm
    Power(f64),
    /// RF output state
    Output(OutputState),
}

impl Command {
    /// Name of the quantity this command sets.
    pub fn quantity(&self) -> &'static str {
        match self {
            Command::Frequency(_) => "frequency",
            Command::Power(_) => "power",
            Command::Output(_) => "output",
        }
    }
}

/// Command handler state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandState {
    /// Waiting for the next command
    Idle,
    /// Executing a command (set, settle, re-query, publish)
    InFlight(Command),
}

/// Subscriptions to the three command topics.
pub struct CommandSubscriptions {
    frequency: Subscription,
    power: Subscription,
    output: Subscription,
}

/// Bridges one [`SignalGenerator`] to the bus. Cheap to clone; clones share the driver.
pub struct SignalGeneratorController<G: SignalGenerator> {
    driver: Arc<G>,
    topics: SignalGeneratorTopics,
    frequency: Publisher,
    power: Publisher,
    output: Publisher,
    settle_delay: Duration,
    state: Arc<watch::Sender<CommandState>>,
}

impl<G: SignalGenerator> Clone for SignalGeneratorController<G> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            topics: self.topics.clone(),
            frequency: self.frequency.clone(),
            power: self.power.clone(),
            output: self.output.clone(),
            settle_delay: self.settle_delay,
            state: Arc::clone(&self.state),
        }
    }
}

impl<G: SignalGenerator + 'static> SignalGeneratorController<G> {
    /// Wraps `driver` and advertises the latched status topics.
    pub fn new(
        driver: G,
        bus: &LocalBus,
        topics: SignalGeneratorTopics,
        settle_delay: Duration,
    ) -> AppResult<Self> {
        let frequency = bus.advertise(&topics.freq, MessageKind::Float64, true)?;
        let power = bus.advertise(&topics.power, MessageKind::Float64, true)?;
        let output = bus.advertise(&topics.onoff, MessageKind::Int32, true)?;
        let (state, _) = watch::channel(CommandState::Idle);
        Ok(Self {
            driver: Arc::new(driver),
            topics,
            frequency,
            power,
            output,
            settle_delay,
            state: Arc::new(state),
        })
    }

    /// Topic names in use.
    pub fn topics(&self) -> &SignalGeneratorTopics {
        &self.topics
    }

    /// Current command handler state.
    pub fn state(&self) -> CommandState {
        *self.state.borrow()
    }

    /// Receiver that observes every command handler state change.
    pub fn watch_state(&self) -> watch::Receiver<CommandState> {
        self.state.subscribe()
    }

    /// Subscribes to the three command topics.
    pub fn subscribe_commands(&self, bus: &LocalBus) -> AppResult<CommandSubscriptions> {
        Ok(CommandSubscriptions {
            frequency: bus.subscribe(&self.topics.freq_cmd, MessageKind::Float64)?,
            power: bus.subscribe(&self.topics.power_cmd, MessageKind::Float64)?,
            output: bus.subscribe(&self.topics.onoff_cmd, MessageKind::Int32)?,
        })
    }

    /// Executes one command: set, wait the settle delay, re-query, publish.
    ///
    /// Returns the confirmed value that was published. On error nothing is published and
    /// the handler is back in [`CommandState::Idle`].
    pub async fn handle_command(&self, command: Command) -> AppResult<Message> {
        self.state.send_replace(CommandState::InFlight(command));
        let result = self.execute(command).await;
        self.state.send_replace(CommandState::Idle);
        result
    }

    async fn execute(&self, command: Command) -> AppResult<Message> {
        let (publisher, message) = match command {
            Command::Frequency(ghz) => {
                self.driver.set_frequency(ghz, FrequencyUnit::GHz).await?;
                self.settle().await;
                (&self.frequency, Message::Float64(self.driver.frequency().await?))
            }
            Command::Power(dbm) => {
                self.driver.set_power(dbm).await?;
                self.settle().await;
                (&self.power, Message::Float64(self.driver.power().await?))
            }
            Command::Output(state) => {
                self.driver.set_output(state).await?;
                self.settle().await;
                let confirmed = self.driver.output().await?;
                (&self.output, Message::Int32(i32::from(confirmed)))
            }
        };
        publisher.publish(message)?;
        Ok(message)
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    /// Queries frequency, power and output, in that order, and publishes each.
    pub async fn poll_once(&self) -> AppResult<()> {
        let ghz = self.driver.frequency().await?;
        self.frequency.publish(Message::Float64(ghz))?;
        let dbm = self.driver.power().await?;
        self.power.publish(Message::Float64(dbm))?;
        let state = self.driver.output().await?;
        self.output.publish(Message::Int32(i32::from(state)))?;
        debug!(model = self.driver.model(), ghz, dbm, %state, "Polled");
        Ok(())
    }

    /// Spawns the command task. Failing commands are logged and do not end the task.
    pub fn spawn_command_loop(&self, commands: CommandSubscriptions) -> TaskHandle {
        let name = format!("{}-commands", self.driver.model());
        let this = self.clone();
        TaskHandle::spawn(name, move |stop| this.command_loop(commands, stop))
    }

    async fn command_loop(self, commands: CommandSubscriptions, mut stop: StopSignal) -> AppResult<()> {
        let CommandSubscriptions {
            mut frequency,
            mut power,
            mut output,
        } = commands;
        info!(model = self.driver.model(), "Command handler started");
        loop {
            let command = tokio::select! {
                _ = stop.stopped() => break,
                Some(envelope) = frequency.recv() => Command::Frequency(envelope.message.as_f64()),
                Some(envelope) = power.recv() => Command::Power(envelope.message.as_f64()),
                Some(envelope) = output.recv() => {
                    Command::Output(OutputState::from(envelope.message.as_f64() as i32))
                }
                else => break,
            };
            debug!(model = self.driver.model(), ?command, "Received command");
            if let Err(e) = self.handle_command(command).await {
                error!(
                    model = self.driver.model(),
                    quantity = command.quantity(),
                    error = %e,
                    "Command failed"
                );
            }
        }
        info!(model = self.driver.model(), "Command handler stopped");
        Ok(())
    }

    /// Spawns the polling task.
    pub fn start_polling(&self, interval: Duration) -> TaskHandle {
        let name = format!("{}-poll", self.driver.model());
        let this = self.clone();
        TaskHandle::spawn(name.clone(), move |stop| async move {
            run_periodic(&name, interval, stop, move || {
                let this = this.clone();
                async move { this.poll_once().await }
            })
            .await
        })
    }
}
