//! Test control plane speaking the bridge protocol over TCP.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pbridge_core::{SessionEventKind, SessionRecord};
use pbridge_protocol::{BridgeMessage, ControllerMessage, MessageType, ProtocolVersion};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

pub const REPORT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Controller
// ============================================================================

/// A report the controller acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub seq: u64,
    pub kind: SessionEventKind,
    pub name: String,
    pub id: String,
}

/// How the controller answers.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Reject every handshake with this reason
    pub reject: Option<String>,
    /// Version announced in the welcome; defaults to the current one
    pub protocol_version: Option<ProtocolVersion>,
    /// Answer this many reports per player id with an error first
    pub fail_reports: HashMap<String, u32>,
}

impl Behavior {
    pub fn failing(player_id: &str, times: u32) -> Self {
        Self {
            fail_reports: [(player_id.to_string(), times)].into_iter().collect(),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct ControllerState {
    received: Mutex<Vec<Received>>,
    failures: Mutex<HashMap<String, u32>>,
    connections: AtomicUsize,
    attempts: AtomicUsize,
}

pub struct TestController {
    pub address: String,
    state: Arc<ControllerState>,
    cancel_token: CancellationToken,
}

impl TestController {
    pub async fn spawn() -> Self {
        Self::spawn_with(Behavior::default()).await
    }

    pub async fn spawn_with(behavior: Behavior) -> Self {
        Self::bind("127.0.0.1:0", behavior).await
    }

    /// Binds to a specific address, e.g. one a bridge is already retrying.
    pub async fn bind(address: &str, behavior: Behavior) -> Self {
        let listener = TcpListener::bind(address).await.expect("bind controller");
        let address = listener.local_addr().unwrap().to_string();

        let state = Arc::new(ControllerState {
            failures: Mutex::new(behavior.fail_reports.clone()),
            ..Default::default()
        });
        let cancel_token = CancellationToken::new();

        {
            let state = Arc::clone(&state);
            let cancel_token = cancel_token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel_token.cancelled() => break,
                        accepted = listener.accept() => {
                            let Ok((stream, _)) = accepted else { break };
                            let id = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                            tokio::spawn(handle_connection(
                                stream,
                                id,
                                behavior.clone(),
                                Arc::clone(&state),
                                cancel_token.clone(),
                            ));
                        }
                    }
                }
            });
        }

        Self {
            address,
            state,
            cancel_token,
        }
    }

    /// Reports acknowledged so far, in arrival order.
    pub fn reports(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }

    /// Report messages seen, including the ones answered with an error.
    pub fn report_attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Polls until `count` reports were acknowledged.
    pub async fn wait_for_reports(&self, count: usize) -> Vec<Received> {
        let start = Instant::now();
        while start.elapsed() < REPORT_WAIT_TIMEOUT {
            let reports = self.reports();
            if reports.len() >= count {
                return reports;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!(
            "expected {count} reports, controller acknowledged {:?}",
            self.reports()
        );
    }

    /// Stops accepting and closes every open connection.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for TestController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn handle_connection(
    stream: TcpStream,
    id: usize,
    behavior: Behavior,
    state: Arc<ControllerState>,
    cancel_token: CancellationToken,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel_token.cancelled() => return,
            read = reader.read_line(&mut line) => read,
        };
        if !matches!(read, Ok(n) if n > 0) {
            return;
        }

        let message: BridgeMessage = serde_json::from_str(line.trim()).expect("valid bridge message");
        let reply = match message.message {
            MessageType::Hello { .. } => match &behavior.reject {
                Some(reason) => ControllerMessage::rejected(reason),
                None => ControllerMessage::Welcome {
                    protocol_version: behavior
                        .protocol_version
                        .unwrap_or(ProtocolVersion::CURRENT),
                    connection_id: format!("conn-{id}"),
                },
            },
            MessageType::ReportConnected { seq, record, .. } => {
                answer_report(&state, seq, &record, SessionEventKind::Connected)
            }
            MessageType::ReportDisconnected { seq, record, .. } => {
                answer_report(&state, seq, &record, SessionEventKind::Disconnected)
            }
            MessageType::Ping { seq } => ControllerMessage::pong(seq),
            MessageType::Goodbye => return,
        };

        let json = serde_json::to_string(&reply).unwrap();
        if writer.write_all(json.as_bytes()).await.is_err()
            || writer.write_all(b"\n").await.is_err()
        {
            return;
        }
    }
}

fn answer_report(
    state: &ControllerState,
    seq: u64,
    record: &SessionRecord,
    kind: SessionEventKind,
) -> ControllerMessage {
    state.attempts.fetch_add(1, Ordering::SeqCst);

    let fail = {
        let mut failures = state.failures.lock().unwrap();
        match failures.get_mut(record.id().as_str()) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    };

    if fail {
        return ControllerMessage::error(Some(seq), "presence store unavailable");
    }

    state.received.lock().unwrap().push(Received {
        seq,
        kind,
        name: record.name().to_string(),
        id: record.id().to_string(),
    });
    ControllerMessage::ack(seq)
}

/// An address nothing is listening on.
pub async fn unused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}
