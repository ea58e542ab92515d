//! Reference-counted session binding for the socket client.
//!
//! Any number of UI surfaces may hold a [`PresenceGuard`]. The first
//! acquisition connects the client, later ones share that connection, and
//! releasing the last guard disconnects it.

use crate::bus::SubscriptionId;
use crate::client::SocketClient;
use parking_lot::Mutex;
use solojourn_protocol::{EventKind, InboundEvent};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default)]
struct PresenceState {
    holders: usize,
    initialized: bool,
}

#[derive(Debug)]
struct PresenceInner {
    client: SocketClient,
    state: Mutex<PresenceState>,
}

impl PresenceInner {
    fn release(&self) {
        let last = {
            let mut st = self.state.lock();
            st.holders = st.holders.saturating_sub(1);
            let last = st.holders == 0 && st.initialized;
            if last {
                st.initialized = false;
            }
            last
        };
        if last {
            info!("last presence holder released, disconnecting");
            self.client.disconnect();
        }
    }
}

/// Binds the client's connection to the lifetime of its holders.
#[derive(Debug, Clone)]
pub struct Presence {
    inner: Arc<PresenceInner>,
}

impl Presence {
    /// Creates a session binding for `client`.
    pub fn new(client: SocketClient) -> Self {
        Self {
            inner: Arc::new(PresenceInner {
                client,
                state: Mutex::new(PresenceState::default()),
            }),
        }
    }

    /// Registers a holder. Connects the client if this is the first one.
    pub async fn acquire(&self) -> PresenceGuard {
        let first = {
            let mut st = self.inner.state.lock();
            st.holders += 1;
            let first = !st.initialized;
            st.initialized = true;
            first
        };
        let guard = PresenceGuard {
            inner: Arc::clone(&self.inner),
        };
        if first {
            info!("first presence holder, connecting");
            self.inner.client.connect().await;
        }
        guard
    }

    /// Returns the number of live guards.
    pub fn holders(&self) -> usize {
        self.inner.state.lock().holders
    }

    /// Returns true while at least one guard holds the session open.
    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    /// Returns true if the underlying client is connected.
    pub fn is_connected(&self) -> bool {
        self.inner.client.is_connected()
    }

    /// Returns the bound client.
    pub fn client(&self) -> &SocketClient {
        &self.inner.client
    }

    /// Registers a handler that stays subscribed for the lifetime of the
    /// returned guard.
    pub fn on_event<F>(&self, kind: EventKind, handler: F) -> EventSubscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = self.inner.client.on(kind, handler);
        EventSubscription {
            client: self.inner.client.clone(),
            kind,
            id,
        }
    }
}

/// Keeps the session open while alive.
pub struct PresenceGuard {
    inner: Arc<PresenceInner>,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl fmt::Debug for PresenceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceGuard").finish_non_exhaustive()
    }
}

/// An event handler registration removed on drop.
#[derive(Debug)]
pub struct EventSubscription {
    client: SocketClient,
    kind: EventKind,
    id: SubscriptionId,
}

impl EventSubscription {
    /// Returns the registration id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.client.off(self.kind, Some(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectionState;
    use crate::config::ClientConfig;
    use crate::storage::SessionStorage;
    use crate::transport::MockConnector;
    use solojourn_testkit::settle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn presence(connector: &MockConnector) -> Presence {
        let storage = SessionStorage::in_memory();
        storage.set_user_token("t").unwrap();
        let client = SocketClient::new(ClientConfig::default(), connector.clone(), storage);
        Presence::new(client)
    }

    #[tokio::test]
    async fn many_holders_share_one_connection() {
        let connector = MockConnector::new();
        let presence = presence(&connector);

        let a = presence.acquire().await;
        let b = presence.acquire().await;
        let c = presence.acquire().await;
        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(presence.holders(), 3);

        drop(a);
        drop(b);
        assert!(presence.is_connected());

        drop(c);
        assert_eq!(presence.client().state(), ConnectionState::Disconnected);
        assert!(!presence.is_initialized());
    }

    #[tokio::test]
    async fn reacquire_after_release_reconnects() {
        let connector = MockConnector::new();
        let presence = presence(&connector);

        drop(presence.acquire().await);
        let _guard = presence.acquire().await;

        assert_eq!(connector.attempt_count(), 2);
        assert!(presence.is_connected());
    }

    #[tokio::test]
    async fn scoped_subscription_deregisters_on_drop() {
        let connector = MockConnector::new();
        let presence = presence(&connector);
        let _guard = presence.acquire().await;

        let seen = Arc::new(AtomicUsize::new(0));
        let subscription = presence.on_event(EventKind::UserOnline, {
            let seen = seen.clone();
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        connector.push(InboundEvent::UserOnline("u2".into()));
        settle().await;
        drop(subscription);
        connector.push(InboundEvent::UserOnline("u3".into()));
        settle().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(presence.client().bus().subscriber_count(EventKind::UserOnline), 0);
    }
}
