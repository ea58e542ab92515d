//! WebSocket [`Connector`] using tokio-tungstenite.
//!
//! Frames are JSON text messages `{"event": <name>, "data": <payload>}`.
//! Each connection runs one pump task that forwards decoded inbound frames
//! and writes outbound actions; unknown or malformed inbound frames are
//! logged and skipped.

use crate::error::{SyncError, SyncResult};
use crate::transport::{Connection, Connector, InboundFrame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use solojourn_protocol::{decode_inbound, encode_outbound, OutboundEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;

/// Response header carrying the server-assigned socket ID.
pub const SOCKET_ID_HEADER: &str = "x-socket-id";

/// Connects to the event hub over a websocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector with the given handshake timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str, token: &str) -> SyncResult<Connection> {
        let mut request = url
            .into_client_request()
            .map_err(|e| SyncError::transport_fatal(format!("invalid socket url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| SyncError::transport_fatal(format!("invalid token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, response) = timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| SyncError::Timeout)?
            .map_err(|e| SyncError::transport_retryable(e.to_string()))?;

        let socket_id = response
            .headers()
            .get(SOCKET_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(%socket_id, "websocket handshake complete");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (mut sink, mut stream) = ws.split();

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    frame = stream.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => match decode_inbound(&text) {
                            Ok(event) => {
                                if in_tx.send(InboundFrame::Event(event)).is_err() {
                                    break None;
                                }
                            }
                            Err(e) => debug!(error = %e, "skipping inbound frame"),
                        },
                        Some(Ok(WsMessage::Close(frame))) => {
                            break Some(
                                frame
                                    .map(|f| f.reason.to_string())
                                    .unwrap_or_else(|| "server closed".into()),
                            );
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break Some("stream ended".into()),
                    },
                    action = out_rx.recv() => match action {
                        Some(action) => match encode_outbound(&action) {
                            Ok(text) => {
                                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                                    break Some(e.to_string());
                                }
                            }
                            Err(e) => warn!(event = action.name(), error = %e, "dropping outbound frame"),
                        },
                        // Client dropped the connection.
                        None => break None,
                    },
                }
            };

            match reason {
                Some(reason) => {
                    let _ = in_tx.send(InboundFrame::Closed(reason));
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                }
            }
        });

        Ok(Connection {
            socket_id,
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
