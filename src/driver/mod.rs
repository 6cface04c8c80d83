//! Instrument drivers.
//!
//! A driver turns typed getters and setters into instrument command strings and parses
//! the textual replies. Every call is exactly one [`SharedTransport`] cycle; drivers keep
//! no cached instrument state.
//!
//! Drivers are grouped by capability trait:
//!
//! - [`SignalGenerator`]: CW frequency, output power, RF output on/off
//! - [`TemperatureMonitor`]: fixed set of temperature channels read with one query
//!
//! [`SharedTransport`]: crate::transport::SharedTransport

pub mod lakeshore218;
pub mod signal_generator;
pub mod tr71w;

pub use lakeshore218::Lakeshore218;
pub use signal_generator::{ScpiSignalGenerator, SignalGeneratorModel};
pub use tr71w::Tr71w;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppResult, BridgeError};

/// Unit accepted by frequency setters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyUnit {
    /// Hertz
    Hz,
    /// Kilohertz
    #[serde(rename = "kHz")]
    KHz,
    /// Megahertz
    MHz,
    /// Gigahertz
    #[default]
    GHz,
}

impl FrequencyUnit {
    /// SCPI suffix for this unit.
    pub fn suffix(self) -> &'static str {
        match self {
            FrequencyUnit::Hz => "Hz",
            FrequencyUnit::KHz => "kHz",
            FrequencyUnit::MHz => "MHz",
            FrequencyUnit::GHz => "GHz",
        }
    }
}

/// RF output state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputState {
    /// RF output enabled
    On,
    /// RF output disabled
    Off,
}

impl From<i32> for OutputState {
    /// `1` is on; every other value is off.
    fn from(value: i32) -> Self {
        if value == 1 {
            OutputState::On
        } else {
            OutputState::Off
        }
    }
}

impl From<OutputState> for i32 {
    fn from(state: OutputState) -> Self {
        match state {
            OutputState::On => 1,
            OutputState::Off => 0,
        }
    }
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputState::On => write!(f, "ON"),
            OutputState::Off => write!(f, "OFF"),
        }
    }
}

/// Closed interval an instrument accepts for a setter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range {
    /// Lower bound, inclusive
    pub min: f64,
    /// Upper bound, inclusive
    pub max: f64,
}

impl Range {
    /// Creates `[min, max]`.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Returns `value` unchanged if it lies within the range.
    ///
    /// # Errors
    /// [`BridgeError::InvalidRange`] otherwise (NaN included). Never clamps.
    pub fn check(&self, quantity: &'static str, value: f64) -> AppResult<f64> {
        if (self.min..=self.max).contains(&value) {
            Ok(value)
        } else {
            Err(BridgeError::InvalidRange {
                quantity,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// CW signal generator.
#[async_trait]
pub trait SignalGenerator: Send + Sync {
    /// Model name used in logs.
    fn model(&self) -> &'static str;

    /// Sets the CW frequency.
    async fn set_frequency(&self, value: f64, unit: FrequencyUnit) -> AppResult<()>;

    /// Current CW frequency in GHz.
    async fn frequency(&self) -> AppResult<f64>;

    /// Sets the output power in dBm.
    async fn set_power(&self, dbm: f64) -> AppResult<()>;

    /// Current output power in dBm.
    async fn power(&self) -> AppResult<f64>;

    /// Switches the RF output.
    async fn set_output(&self, state: OutputState) -> AppResult<()>;

    /// Current RF output state.
    async fn output(&self) -> AppResult<OutputState>;
}

/// Multi-channel temperature reader.
#[async_trait]
pub trait TemperatureMonitor: Send + Sync {
    /// Model name used in logs.
    fn model(&self) -> &'static str;

    /// Number of channels returned by [`TemperatureMonitor::measure`].
    fn channel_count(&self) -> usize;

    /// Reads every channel with one query, in channel order.
    async fn measure(&self) -> AppResult<Vec<f64>>;
}

/// Parses a trimmed numeric reply.
pub(crate) fn parse_f64(reply: &str) -> AppResult<f64> {
    let trimmed = reply.trim();
    trimmed
        .parse::<f64>()
        .map_err(|e| BridgeError::parse(trimmed, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_rejects_without_clamping() {
        let range = Range::new(-20.0, 30.0);
        assert_eq!(range.check("power", 30.0).unwrap(), 30.0);
        assert_eq!(range.check("power", -20.0).unwrap(), -20.0);
        assert!(matches!(
            range.check("power", 45.0),
            Err(BridgeError::InvalidRange { value, .. }) if value == 45.0
        ));
        assert!(range.check("power", f64::NAN).is_err());
    }

    #[test]
    fn test_output_state_from_reply_integer() {
        assert_eq!(OutputState::from(1), OutputState::On);
        assert_eq!(OutputState::from(0), OutputState::Off);
        assert_eq!(OutputState::from(2), OutputState::Off);
        assert_eq!(i32::from(OutputState::On), 1);
    }

    #[test]
    fn test_parse_f64_reports_reply() {
        assert_eq!(parse_f64(" +1.5E1\n").unwrap(), 15.0);
        match parse_f64("ERR") {
            Err(BridgeError::Parse { reply, .. }) => assert_eq!(reply, "ERR"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
