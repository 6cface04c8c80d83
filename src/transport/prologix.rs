//! GPIB-via-Ethernet transport (Prologix GPIB-ETHERNET controller).
//!
//! The adapter listens on TCP port 1234 and forwards every line that does not start
//! with `++` to the addressed GPIB instrument. Lines starting with `++` configure the
//! adapter itself.
//!
//! Session setup on every open:
//!
//! | Command | Meaning |
//! |---|---|
//! | `++mode 1` | controller mode |
//! | `++addr N` | talk to GPIB address N |
//! | `++auto 0` | do not read-after-write automatically |
//! | `++eoi 1` | assert EOI with the last byte |
//! | `++eos 2` | append LF to commands on the bus |
//!
//! Replies are requested explicitly with `++read eoi` before each read.

use async_trait::async_trait;
use std::time::Duration;

use super::{Endpoint, SocketTransport, Transport};
use crate::error::{AppResult, BridgeError};

/// TCP port of the Prologix adapter.
pub const PROLOGIX_PORT: u16 = 1234;

/// Highest primary GPIB address.
pub const MAX_GPIB_ADDRESS: u16 = 30;

/// GPIB instrument reached through a Prologix adapter.
pub struct PrologixTransport {
    socket: SocketTransport,
    gpib_address: u16,
}

impl PrologixTransport {
    /// Creates a closed transport; the endpoint channel is the GPIB address.
    ///
    /// # Errors
    /// [`BridgeError::Configuration`] if the GPIB address is above 30.
    pub fn new(endpoint: Endpoint) -> AppResult<Self> {
        Self::with_adapter_port(endpoint, PROLOGIX_PORT)
    }

    /// Like [`PrologixTransport::new`], for an adapter listening on `port`.
    pub fn with_adapter_port(endpoint: Endpoint, port: u16) -> AppResult<Self> {
        let gpib_address = endpoint.channel();
        if gpib_address > MAX_GPIB_ADDRESS {
            return Err(BridgeError::Configuration(format!(
                "GPIB address {} out of range (0-{})",
                gpib_address, MAX_GPIB_ADDRESS
            )));
        }
        Ok(Self {
            socket: SocketTransport::with_port(endpoint, port),
            gpib_address,
        })
    }

    /// Sets the connect/read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.socket = self.socket.with_timeout(timeout);
        self
    }

    fn setup_commands(&self) -> [String; 5] {
        [
            "++mode 1".to_string(),
            format!("++addr {}", self.gpib_address),
            "++auto 0".to_string(),
            "++eoi 1".to_string(),
            "++eos 2".to_string(),
        ]
    }
}

#[async_trait]
impl Transport for PrologixTransport {
    fn endpoint(&self) -> &Endpoint {
        self.socket.endpoint()
    }

    async fn open(&mut self) -> AppResult<()> {
        self.socket.open().await?;
        for command in self.setup_commands() {
            if let Err(e) = self.socket.send(&command).await {
                let _ = self.socket.close().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        self.socket.send(command).await
    }

    async fn read_line(&mut self) -> AppResult<String> {
        self.socket.send("++read eoi").await?;
        self.socket.read_line().await
    }

    async fn close(&mut self) -> AppResult<()> {
        self.socket.close().await
    }
}
