//! Instrument controllers.
//!
//! A controller owns one driver, publishes its monitored quantities on the bus and, for
//! settable instruments, turns command-topic messages into driver calls. Background work
//! runs in [`TaskHandle`]s that stop on request.

pub mod polling;
pub mod signal_generator;
pub mod temperature;

pub use polling::{run_periodic, StopSignal, TaskHandle};
pub use signal_generator::{
    Command, CommandState, CommandSubscriptions, SignalGeneratorController, SignalGeneratorTopics,
};
pub use temperature::{ChannelBinding, TemperatureController};
