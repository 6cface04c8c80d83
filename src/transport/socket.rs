//! Raw TCP socket transport.
//!
//! Commands are written as `command\n`; replies are read up to the next `\n` and trimmed.
//! Connecting and reading are bounded by the configured timeout.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use super::{Endpoint, Transport, DEFAULT_TIMEOUT};
use crate::error::{AppResult, BridgeError};

/// Line terminator appended to every command.
const TERMINATOR: &str = "\n";

/// TCP socket transport to `host:port`.
pub struct SocketTransport {
    endpoint: Endpoint,
    address: String,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl SocketTransport {
    /// Creates a closed transport for `endpoint`; the TCP port is the endpoint channel.
    pub fn new(endpoint: Endpoint) -> Self {
        let port = endpoint.channel();
        Self::with_port(endpoint, port)
    }

    /// Creates a closed transport that connects to `port` instead of the endpoint channel.
    ///
    /// Used by adapters whose endpoint channel addresses a device behind the socket.
    pub fn with_port(endpoint: Endpoint, port: u16) -> Self {
        let address = format!("{}:{}", endpoint.host(), port);
        Self {
            endpoint,
            address,
            timeout: DEFAULT_TIMEOUT,
            stream: None,
        }
    }

    /// Sets the connect/read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port` this transport connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn stream(&mut self) -> AppResult<&mut BufReader<TcpStream>> {
        let endpoint = &self.endpoint;
        self.stream
            .as_mut()
            .ok_or_else(|| BridgeError::NotOpen(endpoint.to_string()))
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&mut self) -> AppResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let connect = timeout(self.timeout, TcpStream::connect(&self.address)).await;
        let stream = match connect {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(BridgeError::Connection {
                    endpoint: self.address.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(BridgeError::Connection {
                    endpoint: self.address.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::TimedOut),
                })
            }
        };
        stream.set_nodelay(true)?;
        trace!(address = %self.address, "Socket opened");
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let line = format!("{}{}", command, TERMINATOR);
        let stream = self.stream()?;
        stream.get_mut().write_all(line.as_bytes()).await?;
        stream.get_mut().flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> AppResult<String> {
        let limit = self.timeout;
        let address = self.address.clone();
        let stream = self.stream()?;
        let mut line = String::new();
        let read = timeout(limit, stream.read_line(&mut line))
            .await
            .map_err(|_| BridgeError::Timeout {
                timeout: limit,
                what: format!("reply from {}", address),
            })??;
        if read == 0 {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} closed the connection", address),
            )));
        }
        Ok(line.trim().to_string())
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone; closing is best effort.
            let _ = stream.get_mut().shutdown().await;
            trace!(address = %self.address, "Socket closed");
        }
        Ok(())
    }
}
