//! Temperature monitor controller.
//!
//! One Float64 topic per channel; only channels with their enable flag set are
//! advertised and published. All channels are read with a single query per cycle.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::polling::{run_periodic, TaskHandle};
use crate::bus::{LocalBus, Message, MessageKind, Publisher};
use crate::driver::TemperatureMonitor;
use crate::error::{AppResult, BridgeError};

/// Topic and enable flag of one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    /// Status topic (Float64, kelvin or degrees Celsius depending on the instrument)
    pub topic: String,
    /// Whether the channel is published
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ChannelBinding {
    /// Enabled channel publishing on `topic`.
    pub fn enabled(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            enabled: true,
        }
    }

    /// Disabled channel.
    pub fn disabled(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            enabled: false,
        }
    }
}

/// Bridges one [`TemperatureMonitor`] to the bus.
pub struct TemperatureController<M: TemperatureMonitor> {
    monitor: Arc<M>,
    channels: Arc<Vec<Option<Publisher>>>,
}

impl<M: TemperatureMonitor> Clone for TemperatureController<M> {
    fn clone(&self) -> Self {
        Self {
            monitor: Arc::clone(&self.monitor),
            channels: Arc::clone(&self.channels),
        }
    }
}

impl<M: TemperatureMonitor + 'static> TemperatureController<M> {
    /// Wraps `monitor` and advertises a topic for each enabled channel.
    ///
    /// # Errors
    /// [`BridgeError::Configuration`] if the number of bindings differs from the
    /// monitor's channel count.
    pub fn new(monitor: M, bus: &LocalBus, bindings: &[ChannelBinding]) -> AppResult<Self> {
        if bindings.len() != monitor.channel_count() {
            return Err(BridgeError::Configuration(format!(
                "{} has {} channels, {} configured",
                monitor.model(),
                monitor.channel_count(),
                bindings.len()
            )));
        }
        let channels = bindings
            .iter()
            .map(|binding| {
                binding
                    .enabled
                    .then(|| bus.advertise(&binding.topic, MessageKind::Float64, false))
                    .transpose()
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self {
            monitor: Arc::new(monitor),
            channels: Arc::new(channels),
        })
    }

    /// Topics of the enabled channels, in channel order.
    pub fn topics(&self) -> Vec<&str> {
        self.channels
            .iter()
            .flatten()
            .map(Publisher::topic)
            .collect()
    }

    /// Reads every channel once and publishes the enabled ones.
    ///
    /// Returns all readings, disabled channels included.
    pub async fn poll_once(&self) -> AppResult<Vec<f64>> {
        let readings = self.monitor.measure().await?;
        if readings.len() != self.channels.len() {
            return Err(BridgeError::parse(
                format!("{:?}", readings),
                format!("expected {} readings", self.channels.len()),
            ));
        }
        for (publisher, value) in self.channels.iter().zip(&readings) {
            if let Some(publisher) = publisher {
                publisher.publish(Message::Float64(*value))?;
            }
        }
        debug!(model = self.monitor.model(), ?readings, "Polled");
        Ok(readings)
    }

    /// Spawns the polling task.
    pub fn start_polling(&self, interval: Duration) -> TaskHandle {
        let name = format!("{}-poll", self.monitor.model());
        let this = self.clone();
        TaskHandle::spawn(name.clone(), move |stop| async move {
            run_periodic(&name, interval, stop, move || {
                let this = this.clone();
                async move { this.poll_once().await.map(|_| ()) }
            })
            .await
        })
    }
}
