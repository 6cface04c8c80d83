//! JSON-lines relay between the bus and other processes.
//!
//! Outbound, every envelope seen on the bus tap becomes one line:
//!
//! ```text
//! {"topic":"mg3692c_power","stamp":"2026-10-17T12:00:00Z","message":{"type":"Float64","data":-10.0}}
//! ```
//!
//! Inbound, each line of the form `{"topic":"mg3692c_power_cmd","message":{"type":"Float64","data":-10.0}}`
//! is injected into the bus. Malformed lines are logged and skipped.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bus::{Envelope, LocalBus, Message};
use crate::controller::{StopSignal, TaskHandle};
use crate::error::AppResult;

/// One inbound line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Destination topic
    pub topic: String,
    /// Payload
    pub message: Message,
}

/// Renders an envelope as one JSON line, newline included.
pub fn encode_line(envelope: &Envelope) -> AppResult<String> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    Ok(line)
}

/// Spawns the outbound relay writing every bus message to `writer`.
pub fn spawn_outbound<W>(bus: &LocalBus, writer: W) -> TaskHandle
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let tap = bus.tap();
    TaskHandle::spawn("relay-out", move |stop| outbound(tap, writer, stop))
}

async fn outbound<W>(
    mut tap: tokio::sync::broadcast::Receiver<Envelope>,
    mut writer: W,
    mut stop: StopSignal,
) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let envelope = tokio::select! {
            _ = stop.stopped() => break,
            received = tap.recv() => match received {
                Ok(envelope) => envelope,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Relay fell behind, messages dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        writer.write_all(encode_line(&envelope)?.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Spawns the inbound relay injecting every line of `reader` into the bus.
///
/// The task ends cleanly at end of input.
pub fn spawn_inbound<R>(bus: &LocalBus, reader: R) -> TaskHandle
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let bus = bus.clone();
    TaskHandle::spawn("relay-in", move |stop| inbound(bus, reader, stop))
}

async fn inbound<R>(bus: LocalBus, mut reader: R, mut stop: StopSignal) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            _ = stop.stopped() => break,
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            info!("Relay input closed");
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(error = %e, "Skipping relay line that is not UTF-8");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(line) {
            Ok(inbound) => match bus.inject(&inbound.topic, inbound.message) {
                Ok(_) => debug!(topic = %inbound.topic, "Relayed inbound message"),
                Err(e) => warn!(error = %e, "Rejected inbound message"),
            },
            Err(e) => warn!(error = %e, line, "Skipping malformed relay line"),
        }
    }
    Ok(())
}
