//! Transport layer abstraction for the event hub connection.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use solojourn_protocol::{InboundEvent, OutboundEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// Something received from an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A decoded server event.
    Event(InboundEvent),
    /// The server side went away. The string describes why.
    Closed(String),
}

/// An open connection to the event hub.
///
/// Dropping the connection (both channel ends) closes it.
#[derive(Debug)]
pub struct Connection {
    /// Server-assigned socket ID.
    pub socket_id: String,
    /// Fire-and-forget outbound actions.
    pub outbound: mpsc::UnboundedSender<OutboundEvent>,
    /// Inbound events, terminated by [`InboundFrame::Closed`] or channel end.
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

/// Opens connections to the event hub.
///
/// This trait abstracts the network layer so the socket client can run
/// against a websocket, an in-memory mock, or anything else that speaks
/// named events.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens one connection, authenticating with `token`.
    async fn open(&self, url: &str, token: &str) -> SyncResult<Connection>;
}

#[derive(Debug, Default)]
struct MockState {
    fail_next: u32,
    always_fail: bool,
    echo_sends: bool,
    attempts: Vec<Instant>,
    tokens: Vec<String>,
    opened: u32,
    live: Option<mpsc::UnboundedSender<InboundFrame>>,
    sent: Vec<OutboundEvent>,
    gate: Option<Arc<Semaphore>>,
}

/// A scripted in-memory connector for testing.
///
/// Cloning yields another handle to the same mock server.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Creates a connector whose connections always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflects every outbound `message:send` back as an inbound
    /// `message:new`, like a server broadcasting to the room.
    pub fn with_echo(self) -> Self {
        self.state.lock().echo_sends = true;
        self
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next += n;
    }

    /// Makes every connection attempt fail (or succeed again).
    pub fn set_always_fail(&self, fail: bool) {
        self.state.lock().always_fail = fail;
    }

    /// Holds connection attempts open until [`MockConnector::resume_open`].
    pub fn hold_open(&self) {
        self.state
            .lock()
            .gate
            .get_or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    /// Lets every held connection attempt proceed.
    pub fn resume_open(&self) {
        if let Some(gate) = self.state.lock().gate.take() {
            gate.close();
        }
    }

    /// Returns the instants of every connection attempt.
    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }

    /// Returns the number of connection attempts.
    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// Returns the tokens presented on each attempt.
    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().tokens.clone()
    }

    /// Returns the number of connections successfully opened.
    pub fn connections_opened(&self) -> u32 {
        self.state.lock().opened
    }

    /// Returns true if a connection is open and its client end is alive.
    pub fn is_live(&self) -> bool {
        self.state
            .lock()
            .live
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Pushes a server event to the open connection.
    ///
    /// Returns false if nothing is connected; the event is lost, as it would
    /// be on a real hub.
    pub fn push(&self, event: InboundEvent) -> bool {
        let mut state = self.state.lock();
        let delivered = state
            .live
            .as_ref()
            .map(|tx| tx.send(InboundFrame::Event(event)).is_ok())
            .unwrap_or(false);
        if !delivered {
            state.live = None;
        }
        delivered
    }

    /// Drops the open connection from the server side.
    pub fn drop_connection(&self, reason: &str) {
        if let Some(tx) = self.state.lock().live.take() {
            let _ = tx.send(InboundFrame::Closed(reason.to_string()));
        }
    }

    /// Returns every outbound action received so far.
    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.state.lock().sent.clone()
    }

    /// Forgets recorded outbound actions.
    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _url: &str, token: &str) -> SyncResult<Connection> {
        let gate = self.state.lock().gate.clone();
        if let Some(gate) = gate {
            // Closed once resumed.
            let _ = gate.acquire().await;
        }

        let (socket_id, out_tx, mut out_rx, in_tx, in_rx) = {
            let mut state = self.state.lock();
            state.attempts.push(Instant::now());
            state.tokens.push(token.to_string());

            if state.always_fail {
                return Err(SyncError::transport_retryable("mock connection refused"));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(SyncError::transport_retryable("mock connection refused"));
            }

            state.opened += 1;
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel::<OutboundEvent>();
            state.live = Some(in_tx.clone());
            (
                format!("mock-socket-{}", state.opened),
                out_tx,
                out_rx,
                in_tx,
                in_rx,
            )
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                debug!(event = event.name(), "mock hub received");
                let mut guard = state.lock();
                if guard.echo_sends {
                    if let OutboundEvent::SendMessage(message) = &event {
                        let _ = in_tx.send(InboundFrame::Event(InboundEvent::MessageNew(
                            message.clone(),
                        )));
                    }
                }
                guard.sent.push(event);
            }
        });

        Ok(Connection {
            socket_id,
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solojourn_protocol::PresenceStatus;

    #[tokio::test]
    async fn mock_connector_scripted_failures() {
        let connector = MockConnector::new();
        connector.fail_next(2);

        assert!(connector.open("mock://", "t").await.is_err());
        assert!(connector.open("mock://", "t").await.is_err());
        let conn = connector.open("mock://", "t").await.unwrap();

        assert_eq!(conn.socket_id, "mock-socket-1");
        assert_eq!(connector.attempt_count(), 3);
        assert_eq!(connector.connections_opened(), 1);
        assert!(connector.is_live());
    }

    #[tokio::test]
    async fn mock_connector_records_outbound_and_pushes_inbound() {
        let connector = MockConnector::new();
        let mut conn = connector.open("mock://", "t").await.unwrap();

        conn.outbound
            .send(OutboundEvent::Presence(PresenceStatus::Online))
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(
            connector.sent(),
            vec![OutboundEvent::Presence(PresenceStatus::Online)]
        );

        assert!(connector.push(InboundEvent::UserOnline("u2".into())));
        assert_eq!(
            conn.inbound.recv().await,
            Some(InboundFrame::Event(InboundEvent::UserOnline("u2".into())))
        );

        connector.drop_connection("server restart");
        assert_eq!(
            conn.inbound.recv().await,
            Some(InboundFrame::Closed("server restart".into()))
        );
        assert!(!connector.push(InboundEvent::UserOffline("u2".into())));
    }

    #[tokio::test]
    async fn push_without_connection_is_lost() {
        let connector = MockConnector::new();
        assert!(!connector.push(InboundEvent::UserOnline("u2".into())));

        let conn = connector.open("mock://", "t").await.unwrap();
        drop(conn);
        assert!(!connector.is_live());
        assert!(!connector.push(InboundEvent::UserOnline("u2".into())));
    }
}
