//! Protocol message types for control plane communication.

use chrono::{DateTime, Utc};
use pbridge_core::{SessionEvent, SessionRecord};
use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;

/// Message payloads the bridge sends to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake identifying this game server
    Hello {
        /// Name of the game server within the fleet
        server_name: String,
        /// Authentication token (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// A player joined this server
    ReportConnected {
        /// Delivery sequence number, echoed back in the ack
        seq: u64,
        record: SessionRecord,
        /// When the host observed the join
        observed_at: DateTime<Utc>,
    },

    /// A player left this server
    ReportDisconnected {
        seq: u64,
        record: SessionRecord,
        observed_at: DateTime<Utc>,
    },

    /// Health check
    Ping { seq: u64 },

    /// Bridge is going away
    Goodbye,
}

impl MessageType {
    /// Sequence number carried by request messages.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::ReportConnected { seq, .. }
            | Self::ReportDisconnected { seq, .. }
            | Self::Ping { seq } => Some(*seq),
            Self::Hello { .. } | Self::Goodbye => None,
        }
    }
}

/// Messages sent from the bridge to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl BridgeMessage {
    /// Creates a new message stamped with the current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn hello(server_name: impl Into<String>, token: Option<String>) -> Self {
        Self::new(MessageType::Hello {
            server_name: server_name.into(),
            token,
        })
    }

    /// Maps a session event onto the matching report message.
    pub fn report(seq: u64, event: &SessionEvent, observed_at: DateTime<Utc>) -> Self {
        let message = match event {
            SessionEvent::Connected(record) => MessageType::ReportConnected {
                seq,
                record: record.clone(),
                observed_at,
            },
            SessionEvent::Disconnected(record) => MessageType::ReportDisconnected {
                seq,
                record: record.clone(),
                observed_at,
            },
        };
        Self::new(message)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn goodbye() -> Self {
        Self::new(MessageType::Goodbye)
    }
}

/// Messages sent from the control plane to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    /// Handshake accepted
    Welcome {
        /// Controller's protocol version
        protocol_version: ProtocolVersion,
        /// Identifier the controller assigned to this connection
        connection_id: String,
    },

    /// Handshake refused (bad token, version mismatch, ...)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Report with the given sequence number was applied
    Ack { seq: u64 },

    /// Reply to ping
    Pong { seq: u64 },

    /// Request could not be applied
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ControllerMessage {
    pub fn welcome(connection_id: impl Into<String>) -> Self {
        Self::Welcome {
            protocol_version: ProtocolVersion::CURRENT,
            connection_id: connection_id.into(),
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn ack(seq: u64) -> Self {
        Self::Ack { seq }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(seq: Option<u64>, message: &str) -> Self {
        Self::Error {
            seq,
            message: message.to_string(),
            code: None,
        }
    }
}
