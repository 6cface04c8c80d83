//! Mock transport and simulated instruments.
//!
//! [`MockTransport`] records every open/send/read/close in a shared [`MockJournal`] and
//! answers commands through a responder closure. The simulated responders below model
//! just enough instrument state for set-then-get round trips; the CLI's `--simulate`
//! mode runs the bridge against them.
//!
//! All mock operations use async-safe waits (`tokio::time::sleep`, `yield_now`), never
//! `std::thread::sleep`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{Endpoint, Transport};
use crate::error::{AppResult, BridgeError};

/// One recorded transport operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Session opened
    Open,
    /// Command sent
    Send(String),
    /// Reply line read
    Read(String),
    /// Session closed
    Close,
}

/// Shared log of transport operations. Clones observe the same log.
#[derive(Clone, Default)]
pub struct MockJournal {
    events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl MockJournal {
    fn push(&self, event: TransportEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Every recorded event, in order.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the commands sent, in order.
    pub fn sent(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Send(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// In-memory transport with a journal and a scripted responder.
pub struct MockTransport {
    endpoint: Endpoint,
    journal: MockJournal,
    responder: Responder,
    replies: VecDeque<String>,
    latency: Duration,
    reachable: bool,
    open: bool,
}

impl MockTransport {
    /// Transport that accepts everything and never replies.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            journal: MockJournal::default(),
            responder: Box::new(|_| None),
            replies: VecDeque::new(),
            latency: Duration::ZERO,
            reachable: true,
            open: false,
        }
    }

    /// Transport whose `open` always fails, like an unreachable host.
    pub fn unreachable(endpoint: Endpoint) -> Self {
        Self {
            reachable: false,
            ..Self::new(endpoint)
        }
    }

    /// Answers each sent command with `responder(command)`, if it returns a reply.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    /// Simulated round-trip time added to every read.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Handle on this transport's journal.
    pub fn journal(&self) -> MockJournal {
        self.journal.clone()
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(BridgeError::NotOpen(self.endpoint.to_string()))
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&mut self) -> AppResult<()> {
        tokio::task::yield_now().await;
        if !self.reachable {
            return Err(BridgeError::Connection {
                endpoint: self.endpoint.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        self.open = true;
        self.journal.push(TransportEvent::Open);
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        self.ensure_open()?;
        tokio::task::yield_now().await;
        self.journal.push(TransportEvent::Send(command.to_string()));
        if let Some(reply) = (self.responder)(command) {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    async fn read_line(&mut self) -> AppResult<String> {
        self.ensure_open()?;
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        let reply = self.replies.pop_front().ok_or_else(|| BridgeError::Timeout {
            timeout: self.latency,
            what: format!("reply from {}", self.endpoint),
        })?;
        self.journal.push(TransportEvent::Read(reply.clone()));
        Ok(reply)
    }

    async fn close(&mut self) -> AppResult<()> {
        if self.open {
            self.open = false;
            self.replies.clear();
            self.journal.push(TransportEvent::Close);
        }
        Ok(())
    }
}

/// Responder modelling a CW signal generator (frequency, power, output).
///
/// Starts at 1 GHz, -20 dBm, output off. Replies use SCPI exponent formatting.
pub fn simulated_signal_generator() -> impl FnMut(&str) -> Option<String> + Send + 'static {
    let mut frequency_hz = 1.0e9_f64;
    let mut power_dbm = -20.0_f64;
    let mut output_on = false;

    move |command: &str| {
        let command = command.trim();
        match command {
            "FREQ:CW?" => return Some(format!("{:+.10E}", frequency_hz)),
            "POW?" => return Some(format!("{:+.8E}", power_dbm)),
            "OUTP?" => return Some(if output_on { "1" } else { "0" }.to_string()),
            "OUTP ON" => output_on = true,
            "OUTP OFF" => output_on = false,
            _ => {}
        }
        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("FREQ:CW"), Some(value), unit) => {
                if let Ok(value) = value.parse::<f64>() {
                    let scale = match unit.unwrap_or("Hz").to_ascii_uppercase().as_str() {
                        "GHZ" => 1.0e9,
                        "MHZ" => 1.0e6,
                        "KHZ" => 1.0e3,
                        _ => 1.0,
                    };
                    frequency_hz = value * scale;
                }
            }
            (Some("POW"), Some(value), _) => {
                if let Ok(value) = value.parse::<f64>() {
                    power_dbm = value;
                }
            }
            _ => {}
        }
        None
    }
}

/// Responder modelling a Lake Shore 218 with fixed kelvin readings.
///
/// Answers `KRDG?` with all readings and `KRDG? n` with reading `n` (1-based).
pub fn simulated_lakeshore218(readings: [f64; 8]) -> impl FnMut(&str) -> Option<String> + Send + 'static {
    move |command: &str| {
        let mut parts = command.split_whitespace();
        if parts.next() != Some("KRDG?") {
            return None;
        }
        match parts.next() {
            None => Some(
                readings
                    .iter()
                    .map(|k| format!("{:+08.3}", k))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Some(ch) => ch
                .parse::<usize>()
                .ok()
                .and_then(|ch| ch.checked_sub(1))
                .and_then(|idx| readings.get(idx))
                .map(|k| format!("{:+08.3}", k)),
        }
    }
}

/// Renders a TR-71W current-data page with the two channel readings.
///
/// `None` renders the instrument's `----` placeholder for an absent sensor.
pub fn simulated_tr71w_page(ch1: Option<f64>, ch2: Option<f64>) -> String {
    let render = |v: Option<f64>| v.map_or_else(|| "----".to_string(), |v| format!("{:.1}", v));
    [
        "[Current]".to_string(),
        "Serial=5A2B0001".to_string(),
        "Name=TR-71W".to_string(),
        "Date=2026/10/17".to_string(),
        "Time=12:00:00".to_string(),
        format!("CH1={}", render(ch1)),
        format!("CH2={}", render(ch2)),
        String::new(),
    ]
    .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;

    fn endpoint() -> Endpoint {
        Endpoint::new("sim", 1, TransportKind::Gpib)
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let mut mock = MockTransport::new(endpoint());
        assert!(matches!(mock.send("POW?").await, Err(BridgeError::NotOpen(_))));
    }

    #[tokio::test]
    async fn test_unreachable_open_fails_without_journal_entry() {
        let mut mock = MockTransport::unreachable(endpoint());
        let journal = mock.journal();
        assert!(mock.open().await.unwrap_err().is_connection());
        assert!(journal.events().is_empty());
    }

    #[test]
    fn test_simulated_signal_generator_tracks_state() {
        let mut sim = simulated_signal_generator();
        assert_eq!(sim("FREQ:CW 12.5000000000 GHz"), None);
        let hz: f64 = sim("FREQ:CW?").unwrap().parse().unwrap();
        assert!((hz - 12.5e9).abs() < 1.0);

        sim("POW -10.000000 dBm");
        let dbm: f64 = sim("POW?").unwrap().parse().unwrap();
        assert!((dbm + 10.0).abs() < 1e-9);

        sim("OUTP ON");
        assert_eq!(sim("OUTP?").as_deref(), Some("1"));
    }

    #[test]
    fn test_simulated_lakeshore_replies() {
        let mut sim = simulated_lakeshore218([4.2, 10.0, 77.0, 300.0, 0.0, 0.0, 0.0, 0.0]);
        let all = sim("KRDG?").unwrap();
        assert_eq!(all.split(',').count(), 8);
        assert!(all.starts_with("+004.200,+010.000"));
        assert_eq!(sim("KRDG? 4").as_deref(), Some("+300.000"));
        assert_eq!(sim("KRDG? 9"), None);
    }
}
