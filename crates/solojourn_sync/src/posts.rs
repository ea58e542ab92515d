//! Posts synchronization store.
//!
//! Holds the paginated feed. Like and bookmark toggles are pending overlays
//! on the confirmed record until the request resolves; `post:liked` is an
//! authoritative overwrite of the like counter, `post:commented` adds one
//! comment per event. Events for posts not in the local list are ignored.

use crate::api::ApiClient;
use crate::bus::SubscriptionId;
use crate::client::SocketClient;
use crate::error::{SyncError, SyncResult};
use crate::pending::{CorrelationId, PendingToggle, Rollback};
use parking_lot::Mutex;
use solojourn_protocol::{EventKind, NewPost, Post, PostCommented, PostLiked};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    Like,
    Bookmark,
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Toggle::Like => f.write_str("like"),
            Toggle::Bookmark => f.write_str("bookmark"),
        }
    }
}

#[derive(Debug, Clone)]
struct PostEntry {
    confirmed: Post,
    like: Option<PendingToggle>,
    bookmark: Option<PendingToggle>,
}

impl PostEntry {
    fn new(post: Post) -> Self {
        Self {
            confirmed: post,
            like: None,
            bookmark: None,
        }
    }

    fn pending(&self, toggle: Toggle) -> Option<PendingToggle> {
        match toggle {
            Toggle::Like => self.like,
            Toggle::Bookmark => self.bookmark,
        }
    }

    fn pending_mut(&mut self, toggle: Toggle) -> &mut Option<PendingToggle> {
        match toggle {
            Toggle::Like => &mut self.like,
            Toggle::Bookmark => &mut self.bookmark,
        }
    }

    fn view(&self) -> Post {
        let mut post = self.confirmed.clone();
        if let Some(like) = self.like {
            apply_like(&mut post, like);
        }
        if let Some(bookmark) = self.bookmark {
            post.is_bookmarked = bookmark.target;
        }
        post
    }

    fn confirm(&mut self, toggle: Toggle, pending: PendingToggle) {
        match toggle {
            Toggle::Like => apply_like(&mut self.confirmed, pending),
            Toggle::Bookmark => self.confirmed.is_bookmarked = pending.target,
        }
    }
}

/// Flag and counter move together; unlike floors at zero.
fn apply_like(post: &mut Post, like: PendingToggle) {
    if post.is_liked == like.target {
        return;
    }
    post.is_liked = like.target;
    if like.counted {
        post.likes = if like.target {
            post.likes.saturating_add(1)
        } else {
            post.likes.saturating_sub(1)
        };
    }
}

#[derive(Debug, Clone)]
struct PendingPost {
    id: CorrelationId,
    draft: NewPost,
}

#[derive(Debug)]
struct PostState {
    entries: Vec<PostEntry>,
    pending_posts: Vec<PendingPost>,
    page: u32,
    has_more: bool,
    loading: bool,
    refreshing: bool,
    stale: bool,
    load_epoch: u64,
    last_error: Option<String>,
}

impl PostState {
    fn entry_mut(&mut self, post_id: &str) -> Option<&mut PostEntry> {
        self.entries.iter_mut().find(|e| e.confirmed.id == post_id)
    }
}

struct PostInner {
    client: SocketClient,
    api: Arc<dyn ApiClient>,
    page_size: u32,
    state: Mutex<PostState>,
    cancel: CancellationToken,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
}

/// Client-side projection of the feed.
pub struct PostStore {
    inner: Arc<PostInner>,
}

impl PostStore {
    /// Creates an empty store subscribed to `post:liked`, `post:commented`
    /// and `socket:disconnected`.
    pub fn new(client: SocketClient, api: Arc<dyn ApiClient>) -> Self {
        let page_size = client.config().feed_page_size;
        let inner = Arc::new(PostInner {
            client,
            api,
            page_size,
            state: Mutex::new(PostState {
                entries: Vec::new(),
                pending_posts: Vec::new(),
                page: 0,
                has_more: true,
                loading: false,
                refreshing: false,
                stale: false,
                load_epoch: 0,
                last_error: None,
            }),
            cancel: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let liked = inner.client.subscribe::<PostLiked, _>({
            let weak = Weak::clone(&weak);
            move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_post_liked(event);
                }
            }
        });
        let commented = inner.client.subscribe::<PostCommented, _>({
            let weak = Weak::clone(&weak);
            move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_post_commented(event);
                }
            }
        });
        let disconnected = inner.client.on(EventKind::SocketDisconnected, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().stale = true;
            }
        });
        inner.subscriptions.lock().extend([
            (EventKind::PostLiked, liked),
            (EventKind::PostCommented, commented),
            (EventKind::SocketDisconnected, disconnected),
        ]);

        Self { inner }
    }

    /// Fetches one page. `refresh` or `page == 1` replaces the list,
    /// otherwise the page is appended (skipping posts already present).
    pub async fn load(&self, page: u32, refresh: bool) -> SyncResult<()> {
        let epoch = {
            let mut st = self.inner.state.lock();
            st.load_epoch += 1;
            if refresh {
                st.refreshing = true;
            } else {
                st.loading = true;
            }
            st.load_epoch
        };
        self.inner.fetch(epoch, page, refresh).await
    }

    /// Fetches the next page. A no-op while a load is running or once the
    /// feed is exhausted.
    pub async fn load_more(&self) -> SyncResult<()> {
        let (epoch, page) = {
            let mut st = self.inner.state.lock();
            if st.loading || st.refreshing || !st.has_more {
                debug!(page = st.page, has_more = st.has_more, "load_more ignored");
                return Ok(());
            }
            st.load_epoch += 1;
            st.loading = true;
            (st.load_epoch, st.page + 1)
        };
        self.inner.fetch(epoch, page, false).await
    }

    /// Reloads the first page, replacing the list.
    pub async fn refresh(&self) -> SyncResult<()> {
        self.load(1, true).await
    }

    /// Creates a post. On success the server record is prepended.
    pub async fn create_post(&self, draft: NewPost) -> SyncResult<Post> {
        let id = CorrelationId::new();
        self.inner.state.lock().pending_posts.push(PendingPost {
            id,
            draft: draft.clone(),
        });
        let rollback = Rollback::new(|| {
            self.inner.state.lock().pending_posts.retain(|p| p.id != id);
        });

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.api.create_post(&draft) => r,
        };
        rollback.disarm();

        let mut st = self.inner.state.lock();
        st.pending_posts.retain(|p| p.id != id);
        match result {
            Ok(post) => {
                if !st.entries.iter().any(|e| e.confirmed.id == post.id) {
                    st.entries.insert(0, PostEntry::new(post.clone()));
                }
                info!(post_id = %post.id, "post created");
                Ok(post)
            }
            Err(e) => {
                warn!(error = %e, "create post failed");
                st.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Likes a post.
    pub async fn like(&self, post_id: &str) -> SyncResult<()> {
        self.inner.toggle(post_id, Toggle::Like, true).await
    }

    /// Removes a like.
    pub async fn unlike(&self, post_id: &str) -> SyncResult<()> {
        self.inner.toggle(post_id, Toggle::Like, false).await
    }

    /// Bookmarks a post.
    pub async fn bookmark(&self, post_id: &str) -> SyncResult<()> {
        self.inner.toggle(post_id, Toggle::Bookmark, true).await
    }

    /// Removes a bookmark.
    pub async fn unbookmark(&self, post_id: &str) -> SyncResult<()> {
        self.inner.toggle(post_id, Toggle::Bookmark, false).await
    }

    /// Returns the feed as the UI should render it.
    pub fn posts(&self) -> Vec<Post> {
        self.inner.state.lock().entries.iter().map(PostEntry::view).collect()
    }

    /// Returns one post as the UI should render it.
    pub fn post(&self, post_id: &str) -> Option<Post> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .find(|e| e.confirmed.id == post_id)
            .map(PostEntry::view)
    }

    /// Returns true if a like or bookmark of the post awaits confirmation.
    pub fn is_pending(&self, post_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .find(|e| e.confirmed.id == post_id)
            .map(|e| e.like.is_some() || e.bookmark.is_some())
            .unwrap_or(false)
    }

    /// Returns drafts awaiting server confirmation.
    pub fn pending_posts(&self) -> Vec<NewPost> {
        self.inner
            .state
            .lock()
            .pending_posts
            .iter()
            .map(|p| p.draft.clone())
            .collect()
    }

    /// Returns the last page loaded.
    pub fn page(&self) -> u32 {
        self.inner.state.lock().page
    }

    /// Returns true if the server reported a later page.
    pub fn has_more(&self) -> bool {
        self.inner.state.lock().has_more
    }

    /// Returns true while a page load is running.
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().loading
    }

    /// Returns true while a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().refreshing
    }

    /// Returns true if the transport dropped since the last full load;
    /// events from the gap are not replayed.
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

impl Drop for PostStore {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl fmt::Debug for PostStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("PostStore")
            .field("posts", &st.entries.len())
            .field("page", &st.page)
            .field("has_more", &st.has_more)
            .field("stale", &st.stale)
            .finish()
    }
}

impl PostInner {
    async fn fetch(&self, epoch: u64, page: u32, refresh: bool) -> SyncResult<()> {
        // Loading flags belong to the newest load only.
        let rollback = Rollback::new(move || {
            let mut st = self.state.lock();
            if st.load_epoch == epoch {
                st.loading = false;
                st.refreshing = false;
            }
        });
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.api.get_posts(page, self.page_size) => r,
        };
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        rollback.disarm();

        let mut st = self.state.lock();
        if st.load_epoch != epoch {
            debug!(page, "superseded feed load discarded");
            return Err(SyncError::Cancelled);
        }
        st.loading = false;
        st.refreshing = false;

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(page, error = %e, "feed load failed");
                st.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        if refresh || page == 1 {
            let in_flight: HashMap<String, (Option<PendingToggle>, Option<PendingToggle>)> = st
                .entries
                .iter()
                .filter(|e| e.like.is_some() || e.bookmark.is_some())
                .map(|e| (e.confirmed.id.clone(), (e.like, e.bookmark)))
                .collect();
            st.entries = fetched
                .data
                .into_iter()
                .map(|post| {
                    let mut entry = PostEntry::new(post);
                    if let Some((like, bookmark)) = in_flight.get(&entry.confirmed.id) {
                        entry.like = *like;
                        entry.bookmark = *bookmark;
                    }
                    entry
                })
                .collect();
            st.stale = false;
        } else {
            let known: HashSet<String> = st.entries.iter().map(|e| e.confirmed.id.clone()).collect();
            let fresh: Vec<PostEntry> = fetched
                .data
                .into_iter()
                .filter(|p| !known.contains(&p.id))
                .map(PostEntry::new)
                .collect();
            st.entries.extend(fresh);
        }

        st.page = page;
        st.has_more = fetched.pagination.has_next;
        st.last_error = None;
        debug!(page, posts = st.entries.len(), has_more = st.has_more, "feed loaded");
        Ok(())
    }

    async fn toggle(&self, post_id: &str, toggle: Toggle, target: bool) -> SyncResult<()> {
        let id = {
            let mut st = self.state.lock();
            let Some(entry) = st.entry_mut(post_id) else {
                debug!(post_id, %toggle, "post not loaded, ignoring");
                return Ok(());
            };
            if entry.pending(toggle).is_some() {
                return Err(SyncError::MutationInFlight(format!("post {post_id} {toggle}")));
            }
            let current = match toggle {
                Toggle::Like => entry.confirmed.is_liked,
                Toggle::Bookmark => entry.confirmed.is_bookmarked,
            };
            if current == target {
                return Ok(());
            }
            let pending = PendingToggle::new(target);
            *entry.pending_mut(toggle) = Some(pending);
            pending.id
        };
        let rollback = Rollback::new(move || {
            let mut st = self.state.lock();
            if let Some(entry) = st.entry_mut(post_id) {
                if entry.pending(toggle).map(|p| p.id) == Some(id) {
                    *entry.pending_mut(toggle) = None;
                }
            }
        });

        let request = async {
            match (toggle, target) {
                (Toggle::Like, true) => self.api.like_post(post_id).await,
                (Toggle::Like, false) => self.api.unlike_post(post_id).await,
                (Toggle::Bookmark, true) => self.api.bookmark_post(post_id).await,
                (Toggle::Bookmark, false) => self.api.unbookmark_post(post_id).await,
            }
        };
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            r = request => r,
        };
        rollback.disarm();

        let mut st = self.state.lock();
        let error = result.as_ref().err().map(ToString::to_string);
        if let Some(entry) = st.entry_mut(post_id) {
            if entry.pending(toggle).map(|p| p.id) == Some(id) {
                if let Some(pending) = entry.pending_mut(toggle).take() {
                    if result.is_ok() {
                        entry.confirm(toggle, pending);
                    }
                }
            }
        }
        if let Some(error) = error {
            warn!(post_id, %toggle, target, %error, "post update failed");
            st.last_error = Some(error);
        }
        result
    }

    fn on_post_liked(&self, event: &PostLiked) {
        let mut st = self.state.lock();
        match st.entry_mut(&event.post_id) {
            Some(entry) => {
                entry.confirmed.likes = event.likes_count;
                if let Some(like) = entry.like.as_mut() {
                    like.counted = false;
                }
            }
            None => debug!(post_id = %event.post_id, "post:liked for unknown post"),
        }
    }

    fn on_post_commented(&self, event: &PostCommented) {
        let mut st = self.state.lock();
        match st.entry_mut(&event.post_id) {
            Some(entry) => entry.confirmed.comments = entry.confirmed.comments.saturating_add(1),
            None => debug!(post_id = %event.post_id, "post:commented for unknown post"),
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
    use std::time::Duration;

    struct Harness {
        connector: MockConnector,
        api: Arc<MockApi>,
        client: SocketClient,
        store: PostStore,
    }

    async fn harness(posts: Vec<Post>) -> Harness {
        let connector = MockConnector::new();
        let storage = SessionStorage::in_memory();
        storage.set_user_token("t").unwrap();
        let client = SocketClient::new(
            ClientConfig::default().with_user_id("me"),
            connector.clone(),
            storage,
        );
        let api = Arc::new(MockApi::new("me").with_posts(posts));
        let store = PostStore::new(client.clone(), api.clone());
        client.connect().await;
        Harness {
            connector,
            api,
            client,
            store,
        }
    }

    #[tokio::test]
    async fn like_confirms_flag_and_counter_together() {
        let h = harness(vec![fixtures::post("p1", 3)]).await;
        h.store.load(1, false).await.unwrap();

        h.store.like("p1").await.unwrap();
        let post = h.store.post("p1").unwrap();
        assert!(post.is_liked);
        assert_eq!(post.likes, 4);

        // Already liked: no request.
        h.store.like("p1").await.unwrap();
        assert_eq!(h.api.calls(ApiOp::LikePost), 1);
    }

    #[tokio::test]
    async fn failed_like_leaves_no_trace() {
        let h = harness(vec![fixtures::post("p1", 3)]).await;
        h.store.load(1, false).await.unwrap();
        h.api.fail_next(ApiOp::LikePost, 1);

        assert!(h.store.like("p1").await.is_err());
        let post = h.store.post("p1").unwrap();
        assert!(!post.is_liked);
        assert_eq!(post.likes, 3);
        assert!(!h.store.is_pending("p1"));
        assert!(h.store.last_error().is_some());
    }

    #[tokio::test]
    async fn overlay_is_visible_while_in_flight_and_blocks_second_toggle() {
        let h = harness(vec![fixtures::post("p1", 3)]).await;
        h.store.load(1, false).await.unwrap();
        h.api.hold(ApiOp::BookmarkPost);

        let store = &h.store;
        let in_flight = store.bookmark("p1");
        tokio::pin!(in_flight);
        tokio::select! {
            biased;
            _ = &mut in_flight => panic!("request should be held"),
            _ = settle() => {}
        }

        assert!(store.post("p1").unwrap().is_bookmarked);
        assert!(store.is_pending("p1"));
        assert!(matches!(
            store.unbookmark("p1").await,
            Err(SyncError::MutationInFlight(_))
        ));

        h.api.resume(ApiOp::BookmarkPost);
        in_flight.await.unwrap();
        assert!(store.post("p1").unwrap().is_bookmarked);
        assert!(!store.is_pending("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_toggle_releases_its_overlay() {
        let h = harness(vec![fixtures::post("p1", 3)]).await;
        h.store.load(1, false).await.unwrap();
        h.api.hold(ApiOp::LikePost);

        let timed_out = tokio::time::timeout(Duration::from_millis(10), h.store.like("p1")).await;
        assert!(timed_out.is_err());

        let post = h.store.post("p1").unwrap();
        assert!(!post.is_liked);
        assert_eq!(post.likes, 3);
        assert!(!h.store.is_pending("p1"));

        h.api.resume(ApiOp::LikePost);
        h.store.like("p1").await.unwrap();
        assert_eq!(h.store.post("p1").unwrap().likes, 4);
        assert!(h.api.post("p1").unwrap().is_liked);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_page_load_does_not_block_the_next() {
        let h = harness(fixtures::feed(20)).await;
        h.store.load(1, false).await.unwrap();
        h.api.hold(ApiOp::GetPosts);

        let timed_out = tokio::time::timeout(Duration::from_millis(10), h.store.load_more()).await;
        assert!(timed_out.is_err());
        assert!(!h.store.is_loading());
        assert_eq!(h.store.page(), 1);

        h.api.resume(ApiOp::GetPosts);
        h.store.load_more().await.unwrap();
        assert_eq!(h.store.posts().len(), 20);
        assert_eq!(h.store.page(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_create_leaves_no_draft() {
        let h = harness(Vec::new()).await;
        h.api.hold(ApiOp::CreatePost);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            h.store.create_post(NewPost::text("Night bus to Cusco")),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(h.store.pending_posts().is_empty());
    }

    #[tokio::test]
    async fn authoritative_count_supersedes_pending_delta() {
        let h = harness(vec![fixtures::post("p1", 3)]).await;
        h.store.load(1, false).await.unwrap();
        h.api.hold(ApiOp::LikePost);

        let in_flight = h.store.like("p1");
        tokio::pin!(in_flight);
        tokio::select! {
            biased;
            _ = &mut in_flight => panic!("request should be held"),
            _ = settle() => {}
        }
        assert_eq!(h.store.post("p1").unwrap().likes, 4);

        // Someone else's like and ours, as aggregated by the server.
        h.connector.push(InboundEvent::PostLiked(PostLiked {
            post_id: "p1".into(),
            user_id: "u7".into(),
            likes_count: 5,
        }));
        tokio::select! {
            biased;
            _ = &mut in_flight => panic!("request should be held"),
            _ = settle() => {}
        }
        assert_eq!(h.store.post("p1").unwrap().likes, 5);

        h.api.resume(ApiOp::LikePost);
        in_flight.await.unwrap();
        let post = h.store.post("p1").unwrap();
        assert!(post.is_liked);
        assert_eq!(post.likes, 5);
    }

    #[tokio::test]
    async fn comment_events_count_one_each() {
        let h = harness(vec![fixtures::post("p1", 0)]).await;
        h.store.load(1, false).await.unwrap();

        for _ in 0..3 {
            h.connector.push(InboundEvent::PostCommented(PostCommented {
                post_id: "p1".into(),
                comment: serde_json::json!({"text": "nice"}),
            }));
        }
        settle().await;
        assert_eq!(h.store.post("p1").unwrap().comments, 3);
    }

    #[tokio::test]
    async fn create_post_prepends_server_record() {
        let h = harness(fixtures::feed(3)).await;
        h.store.load(1, false).await.unwrap();

        let created = h
            .store
            .create_post(NewPost::text("Sunrise over Hoi An").with_tag("vietnam"))
            .await
            .unwrap();
        let posts = h.store.posts();
        assert_eq!(posts.len(), 4);
        assert_eq!(posts[0].id, created.id);
        assert_eq!(posts[0].likes, 0);
        assert!(h.store.pending_posts().is_empty());
    }

    #[tokio::test]
    async fn refresh_replaces_and_clears_stale() {
        let h = harness(fixtures::feed(3)).await;
        h.store.load(1, false).await.unwrap();

        h.client.disconnect();
        assert!(h.store.is_stale());

        h.api.insert_post(fixtures::post("fresh", 0));
        h.store.refresh().await.unwrap();
        assert!(!h.store.is_stale());
        assert!(!h.store.is_refreshing());
        assert_eq!(h.store.posts()[0].id, "fresh");
        assert_eq!(h.store.posts().len(), 4);
    }

    #[tokio::test]
    async fn close_cancels_load_and_deregisters() {
        let h = harness(fixtures::feed(3)).await;
        h.api.hold(ApiOp::GetPosts);

        let load = h.store.load(1, false);
        tokio::pin!(load);
        tokio::select! {
            biased;
            _ = &mut load => panic!("request should be held"),
            _ = settle() => {}
        }
        h.store.close();
        assert!(matches!(load.await, Err(SyncError::Cancelled)));
        assert!(h.store.posts().is_empty());
        assert_eq!(h.client.bus().subscriber_count(EventKind::PostLiked), 0);
    }
}
