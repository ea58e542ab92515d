//! In-memory [`ApiClient`] for tests, demos and offline mode.

use crate::api::ApiClient;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use solojourn_protocol::{
    Conversation, Message, MessageKind, MessageReaction, NewPost, Notification, Paginated, Post,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Identifies a mock API operation for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    /// `get_posts`
    GetPosts,
    /// `create_post`
    CreatePost,
    /// `like_post`
    LikePost,
    /// `unlike_post`
    UnlikePost,
    /// `bookmark_post`
    BookmarkPost,
    /// `unbookmark_post`
    UnbookmarkPost,
    /// `get_conversations`
    GetConversations,
    /// `get_messages`
    GetMessages,
    /// `send_message`
    SendMessage,
    /// `mark_message_as_read`
    MarkMessageAsRead,
    /// `react_to_message`
    ReactToMessage,
    /// `get_notifications`
    GetNotifications,
    /// `mark_notification_as_read`
    MarkNotificationAsRead,
    /// `mark_all_notifications_as_read`
    MarkAllNotificationsAsRead,
}

#[derive(Debug, Default)]
struct ServerState {
    posts: Vec<Post>,
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<Message>>,
    notifications: Vec<Notification>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next: HashMap<ApiOp, u32>,
    fail_always: HashMap<ApiOp, bool>,
}

/// An in-memory API server.
///
/// Holds server-side state, paginates it for real, and lets tests inject
/// failures, count calls and hold requests open.
pub struct MockApi {
    user_id: String,
    state: Mutex<ServerState>,
    faults: Mutex<Faults>,
    calls: Mutex<HashMap<ApiOp, u32>>,
    gates: Mutex<HashMap<ApiOp, Arc<Semaphore>>>,
    latency: Option<Duration>,
}

impl MockApi {
    /// Creates an empty server acting on behalf of `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            state: Mutex::new(ServerState::default()),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    /// Seeds the feed, newest first.
    pub fn with_posts(self, posts: Vec<Post>) -> Self {
        self.state.lock().posts = posts;
        self
    }

    /// Seeds the conversation list.
    pub fn with_conversations(self, conversations: Vec<Conversation>) -> Self {
        self.state.lock().conversations = conversations;
        self
    }

    /// Seeds a conversation's history, oldest first.
    pub fn with_messages(self, conversation_id: impl Into<String>, messages: Vec<Message>) -> Self {
        self.state
            .lock()
            .messages
            .insert(conversation_id.into(), messages);
        self
    }

    /// Seeds the notification list, newest first.
    pub fn with_notifications(self, notifications: Vec<Notification>) -> Self {
        self.state.lock().notifications = notifications;
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next `n` calls of `op` fail.
    pub fn fail_next(&self, op: ApiOp, n: u32) {
        *self.faults.lock().fail_next.entry(op).or_insert(0) += n;
    }

    /// Makes every call of `op` fail until reset.
    pub fn set_failing(&self, op: ApiOp, failing: bool) {
        self.faults.lock().fail_always.insert(op, failing);
    }

    /// Holds calls of `op` open until [`MockApi::release`] or [`MockApi::resume`].
    pub fn hold(&self, op: ApiOp) {
        self.gates
            .lock()
            .entry(op)
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    /// Lets `n` held calls of `op` proceed.
    pub fn release(&self, op: ApiOp, n: usize) {
        if let Some(gate) = self.gates.lock().get(&op) {
            gate.add_permits(n);
        }
    }

    /// Stops holding `op` and lets every waiting call proceed.
    pub fn resume(&self, op: ApiOp) {
        if let Some(gate) = self.gates.lock().remove(&op) {
            gate.close();
        }
    }

    /// Returns how many times `op` was called.
    pub fn calls(&self, op: ApiOp) -> u32 {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Returns the server-side copy of a post.
    pub fn post(&self, post_id: &str) -> Option<Post> {
        self.state
            .lock()
            .posts
            .iter()
            .find(|p| p.id == post_id)
            .cloned()
    }

    /// Publishes a post created by someone else (visible to the next fetch).
    pub fn insert_post(&self, post: Post) {
        self.state.lock().posts.insert(0, post);
    }

    /// Mutates a stored post the way another client's activity would.
    /// Returns false if the post does not exist.
    pub fn update_post<F: FnOnce(&mut Post)>(&self, post_id: &str, f: F) -> bool {
        match self.state.lock().posts.iter_mut().find(|p| p.id == post_id) {
            Some(post) => {
                f(post);
                true
            }
            None => false,
        }
    }

    /// Stores a message created by someone else (visible to the next fetch).
    pub fn insert_message(&self, message: Message) {
        let mut state = self.state.lock();
        if let Some(conv) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            conv.last_message = Some(message.clone());
            conv.updated_at = message.created_at;
        }
        state
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Stores a notification (visible to the next fetch).
    pub fn insert_notification(&self, notification: Notification) {
        self.state.lock().notifications.insert(0, notification);
    }

    async fn enter(&self, op: ApiOp) -> SyncResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let gate = self.gates.lock().get(&op).cloned();
        if let Some(gate) = gate {
            // A closed gate means the op was resumed.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut faults = self.faults.lock();
        if faults.fail_always.get(&op).copied().unwrap_or(false) {
            return Err(SyncError::Http(format!("injected {op:?} failure")));
        }
        if let Some(remaining) = faults.fail_next.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::Http(format!("injected {op:?} failure")));
            }
        }
        Ok(())
    }
}

fn find_message<'a>(state: &'a mut ServerState, message_id: &str) -> Option<&'a mut Message> {
    state
        .messages
        .values_mut()
        .flat_map(|thread| thread.iter_mut())
        .find(|m| m.id == message_id)
}

#[async_trait]
impl ApiClient for MockApi {
    async fn get_posts(&self, page: u32, limit: u32) -> SyncResult<Paginated<Post>> {
        self.enter(ApiOp::GetPosts).await?;
        Ok(Paginated::slice(&self.state.lock().posts, page, limit))
    }

    async fn create_post(&self, post: &NewPost) -> SyncResult<Post> {
        self.enter(ApiOp::CreatePost).await?;
        let now = Utc::now();
        let created = Post {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            user: None,
            content: post.content.clone(),
            images: post.images.clone(),
            location: post.location.clone(),
            tags: post.tags.clone(),
            likes: 0,
            comments: 0,
            shares: 0,
            is_liked: false,
            is_bookmarked: false,
            created_at: now,
            updated_at: now,
            kind: post.kind,
        };
        self.state.lock().posts.insert(0, created.clone());
        Ok(created)
    }

    async fn like_post(&self, post_id: &str) -> SyncResult<()> {
        self.enter(ApiOp::LikePost).await?;
        let mut state = self.state.lock();
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| SyncError::Rejected("Post not found".into()))?;
        if !post.is_liked {
            post.is_liked = true;
            post.likes += 1;
        }
        Ok(())
    }

    async fn unlike_post(&self, post_id: &str) -> SyncResult<()> {
        self.enter(ApiOp::UnlikePost).await?;
        let mut state = self.state.lock();
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| SyncError::Rejected("Post not found".into()))?;
        if post.is_liked {
            post.is_liked = false;
            post.likes = post.likes.saturating_sub(1);
        }
        Ok(())
    }

    async fn bookmark_post(&self, post_id: &str) -> SyncResult<()> {
        self.enter(ApiOp::BookmarkPost).await?;
        let mut state = self.state.lock();
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| SyncError::Rejected("Post not found".into()))?;
        post.is_bookmarked = true;
        Ok(())
    }

    async fn unbookmark_post(&self, post_id: &str) -> SyncResult<()> {
        self.enter(ApiOp::UnbookmarkPost).await?;
        let mut state = self.state.lock();
        let post = state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| SyncError::Rejected("Post not found".into()))?;
        post.is_bookmarked = false;
        Ok(())
    }

    async fn get_conversations(&self) -> SyncResult<Vec<Conversation>> {
        self.enter(ApiOp::GetConversations).await?;
        Ok(self.state.lock().conversations.clone())
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Paginated<Message>> {
        self.enter(ApiOp::GetMessages).await?;
        let state = self.state.lock();
        let thread = state
            .messages
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(Paginated::slice(thread, page, limit))
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> SyncResult<Message> {
        self.enter(ApiOp::SendMessage).await?;
        let receiver_id = {
            let state = self.state.lock();
            let conv = state
                .conversations
                .iter()
                .find(|c| c.id == conversation_id)
                .ok_or_else(|| SyncError::Rejected("Conversation not found".into()))?;
            conv.participants
                .iter()
                .find(|p| p.id != self.user_id)
                .map(|p| p.id.clone())
                .unwrap_or_default()
        };
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: self.user_id.clone(),
            receiver_id,
            content: content.to_string(),
            kind,
            is_read: false,
            created_at: Utc::now(),
            reactions: Vec::new(),
            reply_to: None,
        };
        self.insert_message(message.clone());
        Ok(message)
    }

    async fn mark_message_as_read(&self, message_id: &str) -> SyncResult<()> {
        self.enter(ApiOp::MarkMessageAsRead).await?;
        let mut state = self.state.lock();
        let message = find_message(&mut state, message_id)
            .ok_or_else(|| SyncError::Rejected("Message not found".into()))?;
        message.is_read = true;
        Ok(())
    }

    async fn react_to_message(
        &self,
        message_id: &str,
        emoji: &str,
    ) -> SyncResult<MessageReaction> {
        self.enter(ApiOp::ReactToMessage).await?;
        let mut state = self.state.lock();
        let message = find_message(&mut state, message_id)
            .ok_or_else(|| SyncError::Rejected("Message not found".into()))?;
        let reaction = MessageReaction {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            user_id: self.user_id.clone(),
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        };
        message.add_reaction(reaction.clone());
        Ok(reaction)
    }

    async fn get_notifications(
        &self,
        page: u32,
        limit: u32,
    ) -> SyncResult<Paginated<Notification>> {
        self.enter(ApiOp::GetNotifications).await?;
        Ok(Paginated::slice(&self.state.lock().notifications, page, limit))
    }

    async fn mark_notification_as_read(&self, notification_id: &str) -> SyncResult<()> {
        self.enter(ApiOp::MarkNotificationAsRead).await?;
        let mut state = self.state.lock();
        let notification = state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or_else(|| SyncError::Rejected("Notification not found".into()))?;
        notification.is_read = true;
        Ok(())
    }

    async fn mark_all_notifications_as_read(&self) -> SyncResult<()> {
        self.enter(ApiOp::MarkAllNotificationsAsRead).await?;
        for notification in self.state.lock().notifications.iter_mut() {
            notification.is_read = true;
        }
        Ok(())
    }
}
