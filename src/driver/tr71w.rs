//! T&D Ondotori TR-71W network thermometer.
//!
//! The logger serves its current readings at `/B/crrntdata/cdata.txt`, one `key=value`
//! pair per CRLF-terminated line. Lines 6 and 7 carry channel 1 and channel 2; a value of
//! `----` means no sensor is attached and is reported as `0.0`.

use async_trait::async_trait;

use super::TemperatureMonitor;
use crate::error::{AppResult, BridgeError};
use crate::transport::PageSource;

/// Path of the current-data page.
pub const CURRENT_DATA_PATH: &str = "/B/crrntdata/cdata.txt";

/// Number of channels on a TR-71W.
pub const CHANNELS: usize = 2;

/// Zero-based line index of channel 1 on the page.
const FIRST_CHANNEL_LINE: usize = 5;

/// Placeholder the logger prints for an absent sensor.
const NO_SENSOR: &str = "----";

/// TR-71W driver over any [`PageSource`].
pub struct Tr71w<P: PageSource> {
    source: P,
}

impl<P: PageSource> Tr71w<P> {
    /// Creates a driver fetching pages from `source`.
    pub fn new(source: P) -> Self {
        Self { source }
    }

    /// Extracts the channel readings from a current-data page.
    pub fn parse_page(page: &str) -> AppResult<Vec<f64>> {
        let lines: Vec<&str> = page.lines().collect();
        (0..CHANNELS)
            .map(|ch| {
                let idx = FIRST_CHANNEL_LINE + ch;
                let line = lines.get(idx).ok_or_else(|| {
                    BridgeError::parse(
                        page.trim(),
                        format!(
                            "page has {} lines, channel {} expected on line {}",
                            lines.len(),
                            ch + 1,
                            idx + 1
                        ),
                    )
                })?;
                let (_, value) = line.split_once('=').ok_or_else(|| {
                    BridgeError::parse(*line, "missing '=' in channel line")
                })?;
                let value = value.trim();
                if value == NO_SENSOR {
                    return Ok(0.0);
                }
                value
                    .parse::<f64>()
                    .map_err(|e| BridgeError::parse(*line, e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl<P: PageSource> TemperatureMonitor for Tr71w<P> {
    fn model(&self) -> &'static str {
        "TR-71W"
    }

    fn channel_count(&self) -> usize {
        CHANNELS
    }

    async fn measure(&self) -> AppResult<Vec<f64>> {
        let page = self.source.fetch().await?;
        Self::parse_page(&page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::simulated_tr71w_page;
    use crate::transport::{Endpoint, StaticPage, TransportKind};

    type Driver = Tr71w<StaticPage>;

    #[test]
    fn test_parse_both_channels() {
        let page = simulated_tr71w_page(Some(23.4), Some(-5.0));
        assert_eq!(Driver::parse_page(&page).unwrap(), vec![23.4, -5.0]);
    }

    #[test]
    fn test_absent_sensor_reads_zero() {
        let page = simulated_tr71w_page(Some(21.0), None);
        assert_eq!(Driver::parse_page(&page).unwrap(), vec![21.0, 0.0]);
    }

    #[test]
    fn test_short_or_garbled_page_is_parse_error() {
        assert!(Driver::parse_page("a=1\r\nb=2").is_err());
        let garbled = simulated_tr71w_page(Some(21.0), Some(22.0)).replace("CH2=22.0", "CH2 22.0");
        assert!(Driver::parse_page(&garbled).is_err());
        let junk = simulated_tr71w_page(Some(21.0), Some(22.0)).replace("CH1=21.0", "CH1=hot");
        assert!(matches!(Driver::parse_page(&junk), Err(BridgeError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_measure_fetches_page() {
        let page = StaticPage::new(
            Endpoint::new("192.168.100.1", 80, TransportKind::Http),
            simulated_tr71w_page(Some(19.5), Some(20.5)),
        );
        let thermometer = Tr71w::new(page.clone());
        assert_eq!(thermometer.measure().await.unwrap(), vec![19.5, 20.5]);

        page.set_body(simulated_tr71w_page(None, Some(18.0)));
        assert_eq!(thermometer.measure().await.unwrap(), vec![0.0, 18.0]);
    }
}
