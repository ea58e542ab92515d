//! The event transport client.
//!
//! [`SocketClient`] owns at most one live [`Connection`] and multiplexes its
//! inbound events onto an [`EventBus`]. Unexpected disconnects are recovered
//! with bounded exponential backoff; connection failures are never returned
//! to callers and are observable only through the `socket:*` events.
//!
//! ```text
//! Uninitialized → Connecting → Connected ⇄ Reconnecting → Failed
//!                      ↘           ↓
//!                       Disconnected (deliberate, or missing token)
//! ```

use crate::bus::{EventBus, InboundPayload, SubscriptionId};
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::storage::SessionStorage;
use crate::transport::{Connection, Connector, InboundFrame};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use solojourn_protocol::{
    Coordinates, EventKind, InboundEvent, Message, OutboundEvent, PresenceStatus,
    ReconnectFailed, SocketConnected, SocketDisconnected, TypingStatus,
};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of the transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// `connect()` was never called.
    Uninitialized,
    /// The first attempt of a `connect()` call is in flight.
    Connecting,
    /// A connection is live.
    Connected,
    /// Deliberately disconnected, or no token was available.
    Disconnected,
    /// Waiting for, or running, a backoff retry.
    Reconnecting,
    /// Retries are exhausted; only an explicit `connect()` restarts.
    Failed,
}

#[derive(Debug)]
struct Link {
    socket_id: String,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
}

#[derive(Debug)]
struct ClientState {
    state: ConnectionState,
    attempts: u32,
    /// Bumped by every `disconnect()`; tasks from an older epoch are inert.
    epoch: u64,
    link: Option<Link>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    storage: SessionStorage,
    bus: EventBus,
    state: Mutex<ClientState>,
}

/// Handle to the event transport client.
///
/// Cloning is cheap; every clone drives the same connection and bus. The
/// stores receive a clone at construction.
#[derive(Clone)]
pub struct SocketClient {
    inner: Arc<Inner>,
}

impl SocketClient {
    /// Creates a disconnected client.
    pub fn new(
        config: ClientConfig,
        connector: impl Connector + 'static,
        storage: SessionStorage,
    ) -> Self {
        Self::with_connector(config, Arc::new(connector), storage)
    }

    /// Creates a disconnected client around a shared connector.
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        storage: SessionStorage,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                storage,
                bus: EventBus::new(),
                state: Mutex::new(ClientState {
                    state: ConnectionState::Uninitialized,
                    attempts: 0,
                    epoch: 0,
                    link: None,
                    reader: None,
                    reconnect: None,
                }),
            }),
        }
    }

    /// Connects to the event hub.
    ///
    /// A no-op while connecting, connected or reconnecting. The session token
    /// is re-read from storage on every attempt. Resolves once the first
    /// attempt has settled; retries continue in the background.
    pub async fn connect(&self) {
        let epoch = {
            let mut st = self.inner.state.lock();
            match st.state {
                ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting => {
                    debug!(state = ?st.state, "connect ignored");
                    return;
                }
                _ => {}
            }
            st.state = ConnectionState::Connecting;
            st.attempts = 0;
            st.epoch
        };
        // Detached so that dropping this future cannot strand the client in
        // `Connecting`.
        let attempt = tokio::spawn(Inner::attempt(Arc::clone(&self.inner), epoch));
        if let Err(e) = attempt.await {
            warn!(error = %e, "connection attempt task failed");
        }
    }

    /// Tears the connection down and cancels any pending retry.
    ///
    /// Subscriptions are kept; a later `connect()` keeps delivering to them.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut st = self.inner.state.lock();
            if st.state == ConnectionState::Uninitialized {
                return;
            }
            st.epoch += 1;
            st.attempts = 0;
            st.state = ConnectionState::Disconnected;
            if let Some(handle) = st.reconnect.take() {
                handle.abort();
            }
            if let Some(handle) = st.reader.take() {
                handle.abort();
            }
            st.link.take().is_some()
        };

        if was_connected {
            info!("disconnected");
            self.inner.bus.emit(&InboundEvent::Disconnected(SocketDisconnected {
                reason: "client disconnect".into(),
                deliberate: true,
            }));
        }
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    /// Returns true if a connection is live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the server-assigned socket ID of the live connection.
    pub fn socket_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .link
            .as_ref()
            .map(|link| link.socket_id.clone())
    }

    /// Returns the number of retries made since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the session storage the token is read from.
    pub fn storage(&self) -> &SessionStorage {
        &self.inner.storage
    }

    /// Registers a handler for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, handler)
    }

    /// Registers a handler receiving the typed payload of `T::KIND`.
    pub fn subscribe<T, F>(&self, handler: F) -> SubscriptionId
    where
        T: InboundPayload,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(handler)
    }

    /// Deregisters one handler, or every handler for `kind`.
    pub fn off(&self, kind: EventKind, id: Option<SubscriptionId>) -> usize {
        self.inner.bus.off(kind, id)
    }

    /// Returns the event bus.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Joins a conversation room.
    pub fn join_conversation(&self, conversation_id: &str) -> bool {
        self.publish(OutboundEvent::JoinConversation(conversation_id.to_string()))
    }

    /// Leaves a conversation room.
    pub fn leave_conversation(&self, conversation_id: &str) -> bool {
        self.publish(OutboundEvent::LeaveConversation(conversation_id.to_string()))
    }

    /// Relays a server-confirmed message to its room.
    pub fn send_message(&self, message: &Message) -> bool {
        self.publish(OutboundEvent::SendMessage(message.clone()))
    }

    /// Relays a read receipt.
    pub fn mark_message_as_read(&self, message_id: &str) -> bool {
        self.publish(OutboundEvent::MarkRead(message_id.to_string()))
    }

    /// Relays the local user's typing state.
    pub fn set_typing(&self, conversation_id: &str, is_typing: bool) -> bool {
        self.publish(OutboundEvent::Typing(TypingStatus {
            conversation_id: conversation_id.to_string(),
            is_typing,
        }))
    }

    /// Shares the device position.
    pub fn share_location(&self, location: Coordinates) -> bool {
        self.publish(OutboundEvent::ShareLocation(location))
    }

    /// Raises a safety alert.
    pub fn send_safety_alert(&self, alert: serde_json::Value) -> bool {
        self.publish(OutboundEvent::SafetyAlert(alert))
    }

    /// Publishes the user's presence.
    pub fn update_presence(&self, status: PresenceStatus) -> bool {
        self.publish(OutboundEvent::Presence(status))
    }

    /// Hands an action to the live connection.
    ///
    /// Returns false if it was dropped because nothing is connected; there
    /// is no outbound queue.
    pub fn publish(&self, event: OutboundEvent) -> bool {
        let st = self.inner.state.lock();
        match &st.link {
            Some(link) => {
                let name = event.name();
                let sent = link.outbound.send(event).is_ok();
                if !sent {
                    debug!(event = name, "connection closing, dropping outbound event");
                }
                sent
            }
            None => {
                debug!(event = event.name(), "not connected, dropping outbound event");
                false
            }
        }
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("SocketClient")
            .field("state", &st.state)
            .field("attempts", &st.attempts)
            .field("socket_id", &st.link.as_ref().map(|l| &l.socket_id))
            .finish()
    }
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// One connection attempt. Boxed because a failed attempt spawns the
    /// next one.
    fn attempt(self: Arc<Self>, epoch: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let token = match self.storage.user_token() {
                Ok(Some(token)) => token,
                Ok(None) => {
                    warn!("no session token stored, not connecting");
                    self.give_up_without_token(epoch);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read session token, not connecting");
                    self.give_up_without_token(epoch);
                    return;
                }
            };

            let open = self.connector.open(&self.config.socket_url, &token);
            let result = match tokio::time::timeout(self.config.connect_timeout, open).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            };

            match result {
                Ok(conn) => self.on_open(epoch, conn),
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "connection attempt failed");
                    self.schedule_reconnect(epoch);
                }
                Err(e) => {
                    warn!(error = %e, "connection attempt failed permanently");
                    self.fail(epoch);
                }
            }
        })
    }

    fn give_up_without_token(&self, epoch: u64) {
        let mut st = self.state.lock();
        if st.epoch == epoch {
            st.state = ConnectionState::Disconnected;
        }
    }

    fn on_open(self: &Arc<Self>, epoch: u64, conn: Connection) {
        let Connection {
            socket_id,
            outbound,
            inbound,
        } = conn;
        {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                debug!(%socket_id, "connection opened after disconnect, closing");
                return;
            }
            st.state = ConnectionState::Connected;
            st.attempts = 0;
            st.link = Some(Link {
                socket_id: socket_id.clone(),
                outbound,
            });
            st.reader = Some(tokio::spawn(Self::read_loop(
                Arc::downgrade(self),
                epoch,
                inbound,
            )));
        }

        info!(%socket_id, "connected");
        self.bus
            .emit(&InboundEvent::Connected(SocketConnected { socket_id }));
    }

    async fn read_loop(
        inner: Weak<Self>,
        epoch: u64,
        mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
    ) {
        let reason = loop {
            match inbound.recv().await {
                Some(InboundFrame::Event(event)) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    if inner.current_epoch() != epoch {
                        return;
                    }
                    inner.bus.emit(&event);
                }
                Some(InboundFrame::Closed(reason)) => break reason,
                None => break "transport closed".to_string(),
            }
        };

        if let Some(inner) = inner.upgrade() {
            inner.on_lost(epoch, reason);
        }
    }

    fn on_lost(self: &Arc<Self>, epoch: u64, reason: String) {
        {
            let mut st = self.state.lock();
            if st.epoch != epoch || st.state != ConnectionState::Connected {
                return;
            }
            st.link = None;
            // This runs on the reader task itself; detach rather than abort.
            st.reader = None;
            st.state = ConnectionState::Disconnected;
        }

        warn!(%reason, "connection lost");
        self.bus.emit(&InboundEvent::Disconnected(SocketDisconnected {
            reason,
            deliberate: false,
        }));
        self.schedule_reconnect(epoch);
    }

    fn schedule_reconnect(self: &Arc<Self>, epoch: u64) {
        let mut st = self.state.lock();
        if st.epoch != epoch {
            return;
        }
        if st.attempts >= self.config.retry.max_attempts {
            drop(st);
            self.fail(epoch);
            return;
        }

        st.attempts += 1;
        st.state = ConnectionState::Reconnecting;
        let attempt = st.attempts;
        let delay = self.config.retry.delay_for_attempt(attempt);
        debug!(attempt, ?delay, "scheduling reconnect");

        let inner = Arc::downgrade(self);
        st.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                Inner::attempt(inner, epoch).await;
            }
        }));
    }

    fn fail(&self, epoch: u64) {
        let attempts = {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                return;
            }
            st.state = ConnectionState::Failed;
            st.attempts
        };
        warn!(attempts, "giving up on the event hub");
        self.bus
            .emit(&InboundEvent::ReconnectFailed(ReconnectFailed { attempts }));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if let Some(handle) = st.reconnect.take() {
            handle.abort();
        }
        if let Some(handle) = st.reader.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::MockConnector;
    use solojourn_testkit::settle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn client(connector: &MockConnector) -> SocketClient {
        let storage = SessionStorage::in_memory();
        storage.set_user_token("token-1").unwrap();
        SocketClient::new(
            ClientConfig::new("mock://hub", "mock://api").with_user_id("me"),
            connector.clone(),
            storage,
        )
    }

    fn counter(client: &SocketClient, kind: EventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        client.on(kind, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn connect_emits_connected_with_socket_id() {
        let connector = MockConnector::new();
        let client = client(&connector);
        assert_eq!(client.state(), ConnectionState::Uninitialized);

        let ids = Arc::new(Mutex::new(Vec::new()));
        {
            let ids = ids.clone();
            client.subscribe::<SocketConnected, _>(move |c| ids.lock().push(c.socket_id.clone()));
        }

        client.connect().await;
        assert!(client.is_connected());
        assert_eq!(client.socket_id().as_deref(), Some("mock-socket-1"));
        assert_eq!(*ids.lock(), vec!["mock-socket-1".to_string()]);
        assert_eq!(connector.tokens(), vec!["token-1".to_string()]);
    }

    #[tokio::test]
    async fn missing_token_does_not_connect_or_retry() {
        let connector = MockConnector::new();
        let client = SocketClient::new(
            ClientConfig::default(),
            connector.clone(),
            SessionStorage::in_memory(),
        );

        client.connect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempt_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_keeps_subscriptions() {
        let connector = MockConnector::new();
        let client = client(&connector);
        let connected = counter(&client, EventKind::SocketConnected);
        let disconnected = counter(&client, EventKind::SocketDisconnected);

        client.connect().await;
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);

        client.connect().await;
        assert_eq!(connected.load(Ordering::SeqCst), 2);
        assert_eq!(client.socket_id().as_deref(), Some("mock-socket-2"));
    }

    #[tokio::test]
    async fn inbound_events_reach_subscribers() {
        let connector = MockConnector::new();
        let client = client(&connector);
        let online = counter(&client, EventKind::UserOnline);

        client.connect().await;
        connector.push(InboundEvent::UserOnline("u2".into()));
        settle().await;
        assert_eq!(online.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outbound_dropped_when_disconnected() {
        let connector = MockConnector::new();
        let client = client(&connector);

        assert!(!client.set_typing("c1", true));

        client.connect().await;
        assert!(client.join_conversation("c1"));
        assert!(client.update_presence(PresenceStatus::Online));
        settle().await;
        assert_eq!(
            connector.sent(),
            vec![
                OutboundEvent::JoinConversation("c1".into()),
                OutboundEvent::Presence(PresenceStatus::Online),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_drop_reconnects_after_backoff() {
        let connector = MockConnector::new();
        let client = client(&connector);
        let disconnected = Arc::new(Mutex::new(Vec::new()));
        {
            let d = disconnected.clone();
            client.subscribe::<SocketDisconnected, _>(move |e| d.lock().push(e.deliberate));
        }

        client.connect().await;
        connector.drop_connection("server restart");
        settle().await;
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        assert_eq!(*disconnected.lock(), vec![false]);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(client.is_connected());
        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(connector.connections_opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let connector = MockConnector::new();
        connector.set_always_fail(true);
        let client = client(&connector);

        client.connect().await;
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        client.disconnect();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn no_retry_policy_fails_immediately() {
        let connector = MockConnector::new();
        connector.set_always_fail(true);
        let storage = SessionStorage::in_memory();
        storage.set_user_token("t").unwrap();
        let client = SocketClient::new(
            ClientConfig::default().with_retry(RetryConfig::no_retry()),
            connector.clone(),
            storage,
        );
        let failed = counter(&client, EventKind::ReconnectFailed);

        client.connect().await;
        assert_eq!(client.state(), ConnectionState::Failed);
        assert_eq!(failed.load(Ordering::SeqCst), 1);

        connector.set_always_fail(false);
        client.connect().await;
        assert!(client.is_connected());
    }
}
