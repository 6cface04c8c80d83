//! SCPI CW signal generators (Agilent E8257D, Anritsu MG3692C).
//!
//! Both models share the same command subset:
//!
//! | Operation | Command | Reply |
//! |---|---|---|
//! | set frequency | `FREQ:CW <value> <unit>` | - |
//! | get frequency | `FREQ:CW?` | Hz |
//! | set power | `POW <dBm> dBm` | - |
//! | get power | `POW?` | dBm |
//! | set output | `OUTP ON` / `OUTP OFF` | - |
//! | get output | `OUTP?` | `1` / `0` |
//!
//! The MG3692C driver refuses power setpoints outside [-20, +30] dBm before anything is
//! written to the instrument; the E8257D driver leaves range checking to the instrument.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{parse_f64, FrequencyUnit, OutputState, Range, SignalGenerator};
use crate::error::{AppResult, BridgeError};
use crate::transport::SharedTransport;

/// Supported signal generator models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalGeneratorModel {
    /// Agilent/Keysight E8257D
    E8257d,
    /// Anritsu MG3692C
    Mg3692c,
}

impl SignalGeneratorModel {
    /// Model name.
    pub fn name(self) -> &'static str {
        match self {
            SignalGeneratorModel::E8257d => "E8257D",
            SignalGeneratorModel::Mg3692c => "MG3692C",
        }
    }

    /// Power range enforced by the driver, if any.
    pub fn power_range(self) -> Option<Range> {
        match self {
            SignalGeneratorModel::E8257d => None,
            SignalGeneratorModel::Mg3692c => Some(Range::new(-20.0, 30.0)),
        }
    }
}

/// Signal generator driven with SCPI commands over a shared transport.
pub struct ScpiSignalGenerator {
    model: SignalGeneratorModel,
    transport: SharedTransport,
}

impl ScpiSignalGenerator {
    /// Creates a driver for `model` on `transport`.
    pub fn new(model: SignalGeneratorModel, transport: SharedTransport) -> Self {
        Self { model, transport }
    }

    fn frequency_command(value: f64, unit: FrequencyUnit) -> String {
        format!("FREQ:CW {:.10} {}", value, unit.suffix())
    }

    fn power_command(dbm: f64) -> String {
        format!("POW {:.6} dBm", dbm)
    }

    fn output_command(state: OutputState) -> String {
        format!("OUTP {}", state)
    }
}

#[async_trait]
impl SignalGenerator for ScpiSignalGenerator {
    fn model(&self) -> &'static str {
        self.model.name()
    }

    async fn set_frequency(&self, value: f64, unit: FrequencyUnit) -> AppResult<()> {
        if !value.is_finite() {
            return Err(BridgeError::InvalidRange {
                quantity: "frequency",
                value,
                min: 0.0,
                max: f64::MAX,
            });
        }
        self.transport
            .write(&Self::frequency_command(value, unit))
            .await?;
        info!(model = self.model(), value, unit = unit.suffix(), "Set frequency");
        Ok(())
    }

    async fn frequency(&self) -> AppResult<f64> {
        let reply = self.transport.query("FREQ:CW?").await?;
        Ok(parse_f64(&reply)? / 1e9)
    }

    async fn set_power(&self, dbm: f64) -> AppResult<()> {
        if let Some(range) = self.model.power_range() {
            range.check("power", dbm)?;
        }
        self.transport.write(&Self::power_command(dbm)).await?;
        info!(model = self.model(), dbm, "Set power");
        Ok(())
    }

    async fn power(&self) -> AppResult<f64> {
        let reply = self.transport.query("POW?").await?;
        parse_f64(&reply)
    }

    async fn set_output(&self, state: OutputState) -> AppResult<()> {
        self.transport.write(&Self::output_command(state)).await?;
        info!(model = self.model(), %state, "Set output");
        Ok(())
    }

    async fn output(&self) -> AppResult<OutputState> {
        let reply = self.transport.query("OUTP?").await?;
        let trimmed = reply.trim();
        let code = trimmed
            .parse::<i32>()
            .map_err(|e| BridgeError::parse(trimmed, e.to_string()))?;
        Ok(OutputState::from(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::simulated_signal_generator;
    use crate::transport::{Endpoint, MockJournal, MockTransport, TransportKind};

    fn driver(model: SignalGeneratorModel) -> (ScpiSignalGenerator, MockJournal) {
        let mock = MockTransport::new(Endpoint::new("10.0.0.5", 1, TransportKind::Gpib))
            .with_responder(simulated_signal_generator());
        let journal = mock.journal();
        (
            ScpiSignalGenerator::new(model, SharedTransport::new(mock)),
            journal,
        )
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(
            ScpiSignalGenerator::frequency_command(12.5, FrequencyUnit::GHz),
            "FREQ:CW 12.5000000000 GHz"
        );
        assert_eq!(
            ScpiSignalGenerator::power_command(-10.0),
            "POW -10.000000 dBm"
        );
        assert_eq!(ScpiSignalGenerator::output_command(OutputState::On), "OUTP ON");
        assert_eq!(ScpiSignalGenerator::output_command(OutputState::Off), "OUTP OFF");
    }

    #[tokio::test]
    async fn test_in_range_values_round_trip() {
        let (sg, _) = driver(SignalGeneratorModel::Mg3692c);
        for dbm in [-20.0, -10.0, 0.0, 12.25, 30.0] {
            sg.set_power(dbm).await.unwrap();
            assert!((sg.power().await.unwrap() - dbm).abs() < 1e-6);
        }
        for ghz in [0.01, 2.4, 12.345, 20.0] {
            sg.set_frequency(ghz, FrequencyUnit::GHz).await.unwrap();
            assert!((sg.frequency().await.unwrap() - ghz).abs() < 1e-9);
        }
        sg.set_frequency(500.0, FrequencyUnit::MHz).await.unwrap();
        assert!((sg.frequency().await.unwrap() - 0.5).abs() < 1e-9);

        sg.set_output(OutputState::On).await.unwrap();
        assert_eq!(sg.output().await.unwrap(), OutputState::On);
        sg.set_output(OutputState::Off).await.unwrap();
        assert_eq!(sg.output().await.unwrap(), OutputState::Off);
    }

    #[tokio::test]
    async fn test_out_of_range_power_sends_nothing() {
        let (sg, journal) = driver(SignalGeneratorModel::Mg3692c);
        for dbm in [45.0, 30.0001, -20.5, f64::NAN] {
            let err = sg.set_power(dbm).await.unwrap_err();
            assert!(matches!(err, BridgeError::InvalidRange { quantity: "power", .. }));
        }
        assert!(journal.events().is_empty());
    }

    #[tokio::test]
    async fn test_e8257d_has_no_driver_power_range() {
        let (sg, journal) = driver(SignalGeneratorModel::E8257d);
        sg.set_power(-60.0).await.unwrap();
        assert_eq!(journal.sent(), vec!["POW -60.000000 dBm".to_string()]);
    }

    #[tokio::test]
    async fn test_frequency_reply_is_converted_to_ghz() {
        let mock = MockTransport::new(Endpoint::new("10.0.0.5", 1, TransportKind::Gpib))
            .with_responder(|_| Some("+1.0000000000E+10".to_string()));
        let sg = ScpiSignalGenerator::new(SignalGeneratorModel::E8257d, SharedTransport::new(mock));
        assert_eq!(sg.frequency().await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_garbled_reply_is_parse_error() {
        let mock = MockTransport::new(Endpoint::new("10.0.0.5", 1, TransportKind::Gpib))
            .with_responder(|_| Some("-221,\"Settings conflict\"".to_string()));
        let sg = ScpiSignalGenerator::new(SignalGeneratorModel::E8257d, SharedTransport::new(mock));
        assert!(matches!(sg.power().await, Err(BridgeError::Parse { .. })));
        assert!(matches!(sg.output().await, Err(BridgeError::Parse { .. })));
    }
}
