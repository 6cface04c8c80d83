//! Lake Shore Model 218 temperature monitor.
//!
//! Eight sensor inputs, read in kelvin with `KRDG?`. Without an argument the instrument
//! answers all eight readings comma-separated, e.g.
//! `+004.200,+010.000,+077.350,+293.150,+000.000,+000.000,+000.000,+000.000`.

use async_trait::async_trait;

use super::{parse_f64, TemperatureMonitor};
use crate::error::{AppResult, BridgeError};
use crate::transport::SharedTransport;

/// Number of sensor inputs on a Model 218.
pub const CHANNELS: usize = 8;

/// Lake Shore 218 driver.
pub struct Lakeshore218 {
    transport: SharedTransport,
}

impl Lakeshore218 {
    /// Creates a driver on `transport`.
    pub fn new(transport: SharedTransport) -> Self {
        Self { transport }
    }

    /// Reads one input (1-8) in kelvin.
    ///
    /// # Errors
    /// [`BridgeError::InvalidChannel`] for channels outside 1-8, before any transport
    /// traffic; otherwise transport and parse errors.
    pub async fn measure_channel(&self, channel: usize) -> AppResult<f64> {
        if !(1..=CHANNELS).contains(&channel) {
            return Err(BridgeError::InvalidChannel {
                channel,
                count: CHANNELS,
            });
        }
        let reply = self.transport.query(&format!("KRDG? {}", channel)).await?;
        parse_f64(&reply)
    }

    /// Splits an all-channel `KRDG?` reply into exactly [`CHANNELS`] readings.
    pub fn parse_readings(reply: &str) -> AppResult<Vec<f64>> {
        let trimmed = reply.trim();
        let fields: Vec<&str> = trimmed.split(',').collect();
        if fields.len() != CHANNELS {
            return Err(BridgeError::parse(
                trimmed,
                format!("expected {} fields, got {}", CHANNELS, fields.len()),
            ));
        }
        fields
            .into_iter()
            .map(|field| {
                field
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| BridgeError::parse(trimmed, format!("{:?}: {}", field, e)))
            })
            .collect()
    }
}

#[async_trait]
impl TemperatureMonitor for Lakeshore218 {
    fn model(&self) -> &'static str {
        "Lakeshore218"
    }

    fn channel_count(&self) -> usize {
        CHANNELS
    }

    async fn measure(&self) -> AppResult<Vec<f64>> {
        let reply = self.transport.query("KRDG?").await?;
        Self::parse_readings(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::simulated_lakeshore218;
    use crate::transport::{Endpoint, MockTransport, TransportKind};

    fn endpoint() -> Endpoint {
        Endpoint::new("10.0.0.6", 12, TransportKind::Gpib)
    }

    #[test]
    fn test_parse_keeps_order() {
        let readings = Lakeshore218::parse_readings(
            "+004.200,+010.000,+077.350,+293.150,+000.000,+001.500,+002.500,+003.500\r\n",
        )
        .unwrap();
        assert_eq!(readings, vec![4.2, 10.0, 77.35, 293.15, 0.0, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_wrong_field_count_is_parse_error() {
        let err = Lakeshore218::parse_readings("+004.200,+010.000").unwrap_err();
        assert!(err.to_string().contains("expected 8 fields, got 2"));
        assert!(Lakeshore218::parse_readings("1,2,3,4,5,6,7,8,9").is_err());
        assert!(Lakeshore218::parse_readings("1,2,3,x,5,6,7,8").is_err());
    }

    #[tokio::test]
    async fn test_measure_issues_one_query() {
        let mock = MockTransport::new(endpoint())
            .with_responder(simulated_lakeshore218([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));
        let journal = mock.journal();
        let monitor = Lakeshore218::new(SharedTransport::new(mock));

        let readings = monitor.measure().await.unwrap();
        assert_eq!(readings, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(journal.sent(), vec!["KRDG?".to_string()]);

        assert_eq!(monitor.measure_channel(3).await.unwrap(), 3.0);
        assert_eq!(journal.sent().last().map(String::as_str), Some("KRDG? 3"));
    }

    #[tokio::test]
    async fn test_invalid_channel_sends_nothing() {
        let mock = MockTransport::new(endpoint());
        let journal = mock.journal();
        let monitor = Lakeshore218::new(SharedTransport::new(mock));

        assert!(matches!(
            monitor.measure_channel(0).await,
            Err(BridgeError::InvalidChannel { channel: 0, .. })
        ));
        assert!(monitor.measure_channel(9).await.is_err());
        assert!(journal.events().is_empty());
    }
}
