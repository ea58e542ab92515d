//! Notifications synchronization store.
//!
//! The unread counter is derived by scanning only when a page is loaded.
//! Every other change adjusts it by exactly the number of items whose
//! visible read state flipped, so the counter always equals the number of
//! unread items the store exposes.
//!
//! Read flips are pending overlays keyed by [`CorrelationId`]. A
//! `mark_all_as_read` tags every unread item with one id, so its failure
//! reverts exactly the items it touched.

use crate::api::ApiClient;
use crate::bus::SubscriptionId;
use crate::client::SocketClient;
use crate::error::{SyncError, SyncResult};
use crate::pending::{CorrelationId, Rollback};
use async_trait::async_trait;
use parking_lot::Mutex;
use solojourn_protocol::{EventKind, Notification};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registers the device for platform push delivery.
#[async_trait]
pub trait PushRegistrar: Send + Sync {
    /// Returns the push token, or `None` if push is unavailable on this
    /// device.
    async fn register(&self) -> SyncResult<Option<String>>;
}

/// A registrar for environments without push delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPushRegistrar;

#[async_trait]
impl PushRegistrar for NoopPushRegistrar {
    async fn register(&self) -> SyncResult<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct NotificationEntry {
    confirmed: Notification,
    pending: BTreeSet<CorrelationId>,
}

impl NotificationEntry {
    fn new(confirmed: Notification) -> Self {
        Self {
            confirmed,
            pending: BTreeSet::new(),
        }
    }

    fn is_read(&self) -> bool {
        self.confirmed.is_read || !self.pending.is_empty()
    }

    fn view(&self) -> Notification {
        let mut n = self.confirmed.clone();
        n.is_read = self.is_read();
        n
    }
}

#[derive(Debug, Default)]
struct NotificationState {
    entries: Vec<NotificationEntry>,
    unread: usize,
    loaded: bool,
    loading: bool,
    stale: bool,
    load_epoch: u64,
    push_attempted: bool,
    push_token: Option<String>,
    last_error: Option<String>,
}

impl NotificationState {
    fn entry_mut(&mut self, id: &str) -> Option<&mut NotificationEntry> {
        self.entries.iter_mut().find(|e| e.confirmed.id == id)
    }

    /// Folds a confirmed mutation into every entry tagged with `id`.
    fn confirm(&mut self, id: CorrelationId) {
        for entry in self.entries.iter_mut() {
            if entry.pending.remove(&id) {
                entry.confirmed.is_read = true;
            }
        }
    }

    /// Drops a failed mutation. Returns how many items became unread again.
    fn revert(&mut self, id: CorrelationId) -> usize {
        let mut reverted = 0;
        for entry in self.entries.iter_mut() {
            if entry.pending.remove(&id) && !entry.is_read() {
                reverted += 1;
            }
        }
        self.unread += reverted;
        reverted
    }
}

struct NotificationInner {
    client: SocketClient,
    api: Arc<dyn ApiClient>,
    push: Arc<dyn PushRegistrar>,
    page_size: u32,
    state: Mutex<NotificationState>,
    cancel: CancellationToken,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
}

/// Client-side projection of the user's notifications.
pub struct NotificationStore {
    inner: Arc<NotificationInner>,
}

impl NotificationStore {
    /// Creates an empty store without push registration.
    pub fn new(client: SocketClient, api: Arc<dyn ApiClient>) -> Self {
        Self::with_push_registrar(client, api, Arc::new(NoopPushRegistrar))
    }

    /// Creates an empty store that registers for push on its first load.
    pub fn with_push_registrar(
        client: SocketClient,
        api: Arc<dyn ApiClient>,
        push: Arc<dyn PushRegistrar>,
    ) -> Self {
        let page_size = client.config().notification_page_size;
        let inner = Arc::new(NotificationInner {
            client,
            api,
            push,
            page_size,
            state: Mutex::new(NotificationState::default()),
            cancel: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let arrived = inner.client.subscribe::<Notification, _>({
            let weak = weak.clone();
            move |notification| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_notification(notification);
                }
            }
        });
        let disconnected = inner.client.on(EventKind::SocketDisconnected, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().stale = true;
            }
        });
        inner.subscriptions.lock().extend([
            (EventKind::NotificationNew, arrived),
            (EventKind::SocketDisconnected, disconnected),
        ]);

        Self { inner }
    }

    /// Fetches the first page, replacing the list and recomputing the
    /// unread counter. The first call also attempts push registration;
    /// a registration failure is logged and does not fail the load.
    pub async fn load(&self) -> SyncResult<()> {
        let (epoch, register) = {
            let mut st = self.inner.state.lock();
            st.load_epoch += 1;
            st.loading = true;
            let register = !st.push_attempted;
            st.push_attempted = true;
            (st.load_epoch, register)
        };
        let rollback = Rollback::new(|| {
            let mut st = self.inner.state.lock();
            if st.load_epoch == epoch {
                st.loading = false;
            }
            if register && st.push_token.is_none() {
                st.push_attempted = false;
            }
        });

        let fetch = async {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
                r = self.inner.api.get_notifications(1, self.inner.page_size) => r,
            }
        };
        let (result, ()) = tokio::join!(fetch, async {
            if register {
                self.inner.register_push().await;
            }
        });

        if self.inner.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        rollback.disarm();
        let mut st = self.inner.state.lock();
        if st.load_epoch != epoch {
            return Err(SyncError::Cancelled);
        }
        st.loading = false;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "loading notifications failed");
                st.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let mut in_flight: HashMap<String, BTreeSet<CorrelationId>> = st
            .entries
            .drain(..)
            .filter(|e| !e.pending.is_empty())
            .map(|e| (e.confirmed.id, e.pending))
            .collect();
        st.entries = page
            .data
            .into_iter()
            .map(|n| {
                let mut entry = NotificationEntry::new(n);
                if let Some(pending) = in_flight.remove(&entry.confirmed.id) {
                    entry.pending = pending;
                }
                entry
            })
            .collect();
        st.unread = st.entries.iter().filter(|e| !e.is_read()).count();
        st.loaded = true;
        st.stale = false;
        st.last_error = None;
        debug!(count = st.entries.len(), unread = st.unread, "notifications loaded");
        Ok(())
    }

    /// Marks one notification as read. Unknown or already-read items are a
    /// no-op.
    pub async fn mark_as_read(&self, notification_id: &str) -> SyncResult<()> {
        let correlation_id = CorrelationId::new();
        {
            let mut st = self.inner.state.lock();
            let Some(entry) = st.entry_mut(notification_id) else {
                debug!(notification_id, "mark_as_read for unknown notification");
                return Ok(());
            };
            if entry.is_read() {
                return Ok(());
            }
            entry.pending.insert(correlation_id);
            st.unread = st.unread.saturating_sub(1);
        }
        let rollback = Rollback::new(|| {
            self.inner.state.lock().revert(correlation_id);
        });

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.api.mark_notification_as_read(notification_id) => r,
        };
        rollback.disarm();
        self.inner.settle(correlation_id, result)
    }

    /// Marks every notification as read and zeroes the unread counter.
    ///
    /// The request is sent even when nothing loaded is unread, since the
    /// server may hold unread items beyond the first page.
    pub async fn mark_all_as_read(&self) -> SyncResult<()> {
        let correlation_id = CorrelationId::new();
        {
            let mut st = self.inner.state.lock();
            for entry in st.entries.iter_mut().filter(|e| !e.is_read()) {
                entry.pending.insert(correlation_id);
            }
            st.unread = 0;
        }
        let rollback = Rollback::new(|| {
            self.inner.state.lock().revert(correlation_id);
        });

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.api.mark_all_notifications_as_read() => r,
        };
        rollback.disarm();
        self.inner.settle(correlation_id, result)
    }

    /// Returns the notifications as the UI should render them, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .map(NotificationEntry::view)
            .collect()
    }

    /// Returns one notification.
    pub fn notification(&self, notification_id: &str) -> Option<Notification> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .find(|e| e.confirmed.id == notification_id)
            .map(NotificationEntry::view)
    }

    /// Returns the unread counter.
    pub fn unread_count(&self) -> usize {
        self.inner.state.lock().unread
    }

    /// Returns true if a read flip for this notification is in flight.
    pub fn is_pending(&self, notification_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .any(|e| e.confirmed.id == notification_id && !e.pending.is_empty())
    }

    /// Returns the push token obtained on first load, if any.
    pub fn push_token(&self) -> Option<String> {
        self.inner.state.lock().push_token.clone()
    }

    /// Returns true once a page has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.inner.state.lock().loaded
    }

    /// Returns true while a load is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().loading
    }

    /// Returns true if the transport dropped since the last load.
    pub fn is_stale(&self) -> bool {
        self.inner.state.lock().stale
    }

    /// Returns the last request error.
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    /// Cancels in-flight requests and deregisters from the client.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for NotificationStore {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl fmt::Debug for NotificationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("NotificationStore")
            .field("notifications", &st.entries.len())
            .field("unread", &st.unread)
            .field("stale", &st.stale)
            .finish()
    }
}

impl NotificationInner {
    fn on_notification(&self, notification: &Notification) {
        let mut st = self.state.lock();
        if st.entry_mut(&notification.id).is_some() {
            debug!(notification_id = %notification.id, "duplicate notification ignored");
            return;
        }
        if !notification.is_read {
            st.unread += 1;
        }
        st.entries.insert(0, NotificationEntry::new(notification.clone()));
    }

    fn settle(&self, id: CorrelationId, result: SyncResult<()>) -> SyncResult<()> {
        let mut st = self.state.lock();
        match result {
            Ok(()) => {
                st.confirm(id);
                Ok(())
            }
            Err(e) => {
                let reverted = st.revert(id);
                warn!(error = %e, reverted, "marking notifications as read failed");
                st.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn register_push(&self) {
        match self.push.register().await {
            Ok(Some(token)) => {
                info!("registered for push delivery");
                self.state.lock().push_token = Some(token);
            }
            Ok(None) => debug!("push delivery unavailable"),
            Err(e) => warn!(error = %e, "push registration failed"),
        }
    }

    fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        for (kind, id) in self.subscriptions.lock().drain(..) {
            self.client.off(kind, Some(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::mock_api::{ApiOp, MockApi};
    use crate::storage::SessionStorage;
    use crate::transport::MockConnector;
    use solojourn_protocol::InboundEvent;
    use solojourn_testkit::{fixtures, settle};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Harness {
        connector: MockConnector,
        api: Arc<MockApi>,
        store: NotificationStore,
    }

    async fn harness_with(notifications: Vec<Notification>, push: Arc<dyn PushRegistrar>) -> Harness {
        let connector = MockConnector::new();
        let storage = SessionStorage::in_memory();
        storage.set_user_token("t").unwrap();
        let client = SocketClient::new(
            ClientConfig::default().with_user_id("me"),
            connector.clone(),
            storage,
        );
        let api = Arc::new(MockApi::new("me").with_notifications(notifications));
        let store = NotificationStore::with_push_registrar(client.clone(), api.clone(), push);
        client.connect().await;
        Harness {
            connector,
            api,
            store,
        }
    }

    async fn harness(notifications: Vec<Notification>) -> Harness {
        harness_with(notifications, Arc::new(NoopPushRegistrar)).await
    }

    fn unread_in_view(store: &NotificationStore) -> usize {
        store.notifications().iter().filter(|n| !n.is_read).count()
    }

    #[tokio::test]
    async fn load_counts_unread() {
        let h = harness(fixtures::notifications(5, 2)).await;
        h.store.load().await.unwrap();

        assert_eq!(h.store.notifications().len(), 5);
        assert_eq!(h.store.unread_count(), 3);
        assert!(h.store.is_loaded());
    }

    #[tokio::test]
    async fn push_arrivals_prepend_and_count() {
        let h = harness(fixtures::notifications(2, 0)).await;
        h.store.load().await.unwrap();

        h.connector
            .push(InboundEvent::NotificationNew(fixtures::notification("n9", false)));
        h.connector
            .push(InboundEvent::NotificationNew(fixtures::notification("n10", true)));
        h.connector
            .push(InboundEvent::NotificationNew(fixtures::notification("n9", false)));
        settle().await;

        let ids: Vec<_> = h.store.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n10", "n9", "n1", "n2"]);
        assert_eq!(h.store.unread_count(), 3);
    }

    #[tokio::test]
    async fn mark_as_read_twice_decrements_once() {
        let h = harness(fixtures::notifications(3, 0)).await;
        h.store.load().await.unwrap();

        h.store.mark_as_read("n1").await.unwrap();
        h.store.mark_as_read("n1").await.unwrap();
        h.store.mark_as_read("missing").await.unwrap();

        assert_eq!(h.store.unread_count(), 2);
        assert_eq!(h.api.calls(ApiOp::MarkNotificationAsRead), 1);
        assert!(h.store.notification("n1").unwrap().is_read);
    }

    #[tokio::test]
    async fn failed_mark_all_reverts_only_touched_items() {
        let h = harness(fixtures::notifications(4, 4)).await;
        h.store.load().await.unwrap();
        assert_eq!(h.store.unread_count(), 3);

        h.api.fail_next(ApiOp::MarkAllNotificationsAsRead, 1);
        assert!(h.store.mark_all_as_read().await.is_err());

        assert_eq!(h.store.unread_count(), 3);
        assert!(h.store.notification("n4").unwrap().is_read);
        assert_eq!(unread_in_view(&h.store), 3);

        h.store.mark_all_as_read().await.unwrap();
        assert_eq!(h.store.unread_count(), 0);
        assert_eq!(unread_in_view(&h.store), 0);
    }

    #[tokio::test]
    async fn pending_read_is_visible_and_counted() {
        let h = harness(fixtures::notifications(2, 0)).await;
        h.store.load().await.unwrap();
        h.api.hold(ApiOp::MarkNotificationAsRead);

        let mark = h.store.mark_as_read("n1");
        tokio::pin!(mark);
        tokio::select! {
            biased;
            _ = &mut mark => panic!("request should be held"),
            _ = settle() => {}
        }
        assert!(h.store.is_pending("n1"));
        assert!(h.store.notification("n1").unwrap().is_read);
        assert_eq!(h.store.unread_count(), 1);

        h.api.resume(ApiOp::MarkNotificationAsRead);
        mark.await.unwrap();
        assert!(!h.store.is_pending("n1"));
        assert_eq!(h.store.unread_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_mark_restores_counter() {
        let h = harness(fixtures::notifications(3, 0)).await;
        h.store.load().await.unwrap();
        h.api.hold(ApiOp::MarkNotificationAsRead);
        h.api.hold(ApiOp::MarkAllNotificationsAsRead);

        let one = tokio::time::timeout(Duration::from_millis(10), h.store.mark_as_read("n1")).await;
        assert!(one.is_err());
        assert!(!h.store.is_pending("n1"));
        assert_eq!(h.store.unread_count(), 3);

        let all = tokio::time::timeout(Duration::from_millis(10), h.store.mark_all_as_read()).await;
        assert!(all.is_err());
        assert_eq!(h.store.unread_count(), 3);
        assert_eq!(unread_in_view(&h.store), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_load_resets_loading() {
        let h = harness(fixtures::notifications(2, 0)).await;
        h.api.hold(ApiOp::GetNotifications);

        let load = tokio::time::timeout(Duration::from_millis(10), h.store.load()).await;
        assert!(load.is_err());
        assert!(!h.store.is_loading());
        assert!(!h.store.is_loaded());

        h.api.resume(ApiOp::GetNotifications);
        h.store.load().await.unwrap();
        assert_eq!(h.store.unread_count(), 2);
    }

    struct CountingRegistrar {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl PushRegistrar for CountingRegistrar {
        async fn register(&self) -> SyncResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SyncError::Rejected("permission denied".into()));
            }
            Ok(Some("push-token".into()))
        }
    }

    #[tokio::test]
    async fn push_registration_runs_once() {
        let registrar = Arc::new(CountingRegistrar {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let h = harness_with(fixtures::notifications(1, 0), registrar.clone()).await;

        h.store.load().await.unwrap();
        h.store.load().await.unwrap();

        assert_eq!(registrar.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.push_token().as_deref(), Some("push-token"));
    }

    #[tokio::test]
    async fn push_registration_failure_is_not_fatal() {
        let registrar = Arc::new(CountingRegistrar {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let h = harness_with(fixtures::notifications(2, 0), registrar).await;

        h.store.load().await.unwrap();
        assert_eq!(h.store.unread_count(), 2);
        assert!(h.store.push_token().is_none());
    }

    #[tokio::test]
    async fn disconnect_marks_stale_until_load() {
        let h = harness(fixtures::notifications(1, 0)).await;
        h.store.load().await.unwrap();

        h.connector.drop_connection("server restart");
        settle().await;
        assert!(h.store.is_stale());

        h.store.load().await.unwrap();
        assert!(!h.store.is_stale());
    }
}
