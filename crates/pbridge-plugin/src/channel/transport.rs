//! Transport seam between the delivery worker and the control plane.
//!
//! The worker only sees the [`Transport`] and [`Connection`] traits, so
//! the retry and ordering logic can be exercised without a network. The
//! production implementation, [`TcpTransport`], speaks the newline-delimited
//! JSON protocol from `pbridge-protocol`:
//!
//! 1. Connect the TCP stream
//! 2. Send `hello`, wait for `welcome` (or `rejected`)
//! 3. For each report, send it and wait for the matching `ack`
//!
//! Timeouts are applied by the caller, not here.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use pbridge_core::SessionEvent;
use pbridge_protocol::{BridgeMessage, ControllerMessage, ProtocolVersion};

use crate::error::TransportError;

/// Maximum accepted reply size (64 KiB); replies are tiny.
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Stale pongs/acks tolerated while waiting for one reply.
const MAX_SKIPPED_REPLIES: usize = 8;

// ============================================================================
// Traits
// ============================================================================

/// Factory for connections to the control plane.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens and handshakes a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// An established, handshaken connection to the control plane.
#[async_trait]
pub trait Connection: Send {
    /// Delivers one session event; returns once the controller acknowledged it.
    async fn report(
        &mut self,
        seq: u64,
        event: &SessionEvent,
        observed_at: DateTime<Utc>,
    ) -> Result<(), TransportError>;

    /// Round-trips a health check.
    async fn ping(&mut self, seq: u64) -> Result<(), TransportError>;

    /// Best-effort graceful close.
    async fn close(&mut self);
}

// ============================================================================
// TCP Transport
// ============================================================================

/// Connects to the control plane over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
    server_name: String,
    token: Option<String>,
}

impl TcpTransport {
    pub fn new(
        address: impl Into<String>,
        server_name: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            address: address.into(),
            server_name: server_name.into(),
            token,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let stream =
            TcpStream::connect(&self.address)
                .await
                .map_err(|e| TransportError::Connect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let mut connection = TcpConnection {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
            connection_id: String::new(),
        };

        connection
            .handshake(&self.server_name, self.token.clone())
            .await?;

        info!(
            address = %self.address,
            connection_id = %connection.connection_id,
            "Connected to controller"
        );
        Ok(Box::new(connection))
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// One handshaken TCP connection.
pub struct TcpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Reused read buffer
    line: String,
    connection_id: String,
}

impl TcpConnection {
    async fn handshake(
        &mut self,
        server_name: &str,
        token: Option<String>,
    ) -> Result<(), TransportError> {
        self.send(&BridgeMessage::hello(server_name, token)).await?;

        match self.recv().await? {
            ControllerMessage::Welcome {
                protocol_version,
                connection_id,
            } => {
                ProtocolVersion::CURRENT.ensure_compatible(&protocol_version)?;
                debug!(
                    connection_id = %connection_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                self.connection_id = connection_id;
                Ok(())
            }
            ControllerMessage::Rejected {
                reason,
                protocol_version,
            } => {
                ProtocolVersion::CURRENT.ensure_compatible(&protocol_version)?;
                Err(TransportError::Rejected(reason))
            }
            other => Err(TransportError::Protocol(format!(
                "Unexpected response to hello: {other:?}"
            ))),
        }
    }

    /// Serializes the message as one JSON line and flushes it.
    async fn send(&mut self, message: &BridgeMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to controller");
        Ok(())
    }

    /// Reads and parses one reply line.
    async fn recv(&mut self) -> Result<ControllerMessage, TransportError> {
        self.line.clear();
        let read = self.reader.read_line(&mut self.line).await?;
        if read == 0 {
            return Err(TransportError::Closed);
        }
        if self.line.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::Protocol(format!(
                "Reply exceeds {MAX_MESSAGE_SIZE} bytes"
            )));
        }
        Ok(serde_json::from_str(self.line.trim())?)
    }

    /// Waits for the reply to request `seq`, skipping late replies to
    /// earlier requests (e.g. an ack that arrived after a timeout).
    async fn await_reply(&mut self, seq: u64) -> Result<ControllerMessage, TransportError> {
        for _ in 0..=MAX_SKIPPED_REPLIES {
            let reply = self.recv().await?;
            match &reply {
                ControllerMessage::Ack { seq: got } | ControllerMessage::Pong { seq: got }
                    if *got != seq =>
                {
                    debug!(expected = seq, got, "Skipping stale reply");
                }
                ControllerMessage::Error {
                    seq: Some(got), ..
                } if *got != seq => {
                    debug!(expected = seq, got, "Skipping stale error reply");
                }
                _ => return Ok(reply),
            }
        }
        Err(TransportError::Protocol(format!(
            "No reply for request #{seq}"
        )))
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn report(
        &mut self,
        seq: u64,
        event: &SessionEvent,
        observed_at: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        self.send(&BridgeMessage::report(seq, event, observed_at))
            .await?;

        match self.await_reply(seq).await? {
            ControllerMessage::Ack { .. } => Ok(()),
            ControllerMessage::Error { message, code, .. } => {
                Err(TransportError::Remote { message, code })
            }
            other => Err(TransportError::Protocol(format!(
                "Unexpected reply to report #{seq}: {other:?}"
            ))),
        }
    }

    async fn ping(&mut self, seq: u64) -> Result<(), TransportError> {
        self.send(&BridgeMessage::ping(seq)).await?;

        match self.await_reply(seq).await? {
            ControllerMessage::Pong { .. } => Ok(()),
            other => Err(TransportError::Protocol(format!(
                "Unexpected reply to ping #{seq}: {other:?}"
            ))),
        }
    }

    async fn close(&mut self) {
        // Ignore errors: the controller may already be gone
        let _ = self.send(&BridgeMessage::goodbye()).await;
        let _ = self.writer.shutdown().await;
        debug!(connection_id = %self.connection_id, "Connection closed");
    }
}
