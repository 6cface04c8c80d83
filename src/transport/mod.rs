//! Request/response transports to instruments.
//!
//! A [`Transport`] is a line-oriented session to a single device: open it, send command
//! strings, read reply lines, close it. Drivers never touch a transport directly; they go
//! through [`SharedTransport`], which serialises whole open→send→receive→close cycles.
//!
//! ## Implementations
//!
//! - [`SocketTransport`]: raw TCP socket (instruments with a LAN port)
//! - [`PrologixTransport`]: GPIB instrument behind a Prologix GPIB-Ethernet adapter
//! - [`MockTransport`]: journaled in-memory transport with simulated instruments
//!
//! The HTTP-attached thermometer does not speak a line protocol; it is served by
//! [`PageSource`] in the `http` submodule.

pub mod http;
pub mod mock;
pub mod prologix;
pub mod socket;

pub use http::{HttpPageSource, PageSource, StaticPage};
pub use mock::{MockJournal, MockTransport, TransportEvent};
pub use prologix::PrologixTransport;
pub use socket::SocketTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AppResult;

/// Default connect/read timeout for socket transports.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// How an instrument is physically reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// GPIB bus behind a GPIB-Ethernet adapter; channel is the GPIB address
    Gpib,
    /// Raw TCP socket; channel is the TCP port
    Lan,
    /// HTTP page; channel is unused
    Http,
}

/// Identifies one device: address, channel and transport kind.
///
/// Immutable after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    channel: u16,
    kind: TransportKind,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, channel: u16, kind: TransportKind) -> Self {
        Self {
            host: host.into(),
            channel,
            kind,
        }
    }

    /// Host name or IP address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// GPIB address or TCP port, depending on [`Endpoint::kind`].
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Transport kind.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportKind::Gpib => write!(f, "gpib://{}/{}", self.host, self.channel),
            TransportKind::Lan => write!(f, "tcp://{}:{}", self.host, self.channel),
            TransportKind::Http => write!(f, "http://{}", self.host),
        }
    }
}

/// A line-oriented session to one instrument.
///
/// Implementations are not reentrant; [`SharedTransport`] provides the exclusion.
#[async_trait]
pub trait Transport: Send {
    /// Endpoint this transport talks to.
    fn endpoint(&self) -> &Endpoint;

    /// Opens the session.
    async fn open(&mut self) -> AppResult<()>;

    /// Sends one command line (terminator added by the transport).
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Blocks for one reply line, returned without its terminator.
    async fn read_line(&mut self) -> AppResult<String>;

    /// Closes the session. Closing a closed session is a no-op.
    async fn close(&mut self) -> AppResult<()>;
}

/// Transport shared between the command handler and the polling task.
///
/// The transport sits behind one async mutex held for an entire
/// open→send→receive→close cycle, so cycles issued from different tasks never
/// interleave on the wire. Without it, a poll that lands during a command's settle
/// delay could write its query between the command and its reply.
#[derive(Clone)]
pub struct SharedTransport {
    endpoint: Endpoint,
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl SharedTransport {
    /// Wraps `transport` for shared use.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            endpoint: transport.endpoint().clone(),
            inner: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    /// Endpoint of the wrapped transport.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// One write cycle: open, send `command`, close.
    pub async fn write(&self, command: &str) -> AppResult<()> {
        let mut transport = self.inner.lock().await;
        transport.open().await?;
        let sent = transport.send(command).await;
        let closed = transport.close().await;
        sent?;
        closed?;
        debug!(endpoint = %self.endpoint, command, "Sent command");
        Ok(())
    }

    /// One query cycle: open, send `command`, read one reply line, close.
    pub async fn query(&self, command: &str) -> AppResult<String> {
        let mut transport = self.inner.lock().await;
        transport.open().await?;
        let reply = match transport.send(command).await {
            Ok(()) => transport.read_line().await,
            Err(e) => Err(e),
        };
        let closed = transport.close().await;
        let reply = reply?;
        closed?;
        debug!(endpoint = %self.endpoint, command, reply = %reply, "Received reply");
        Ok(reply)
    }

    /// Opens and closes the transport once to check the instrument is reachable.
    pub async fn probe(&self) -> AppResult<()> {
        let mut transport = self.inner.lock().await;
        transport.open().await?;
        transport.close().await
    }
}
