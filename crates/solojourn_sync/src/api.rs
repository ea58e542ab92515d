//! Request/response collaborator used by the stores.
//!
//! The stores only depend on [`ApiClient`]. [`crate::RestApi`] maps it onto
//! the HTTP endpoints and [`crate::MockApi`] serves it from memory.

use crate::error::SyncResult;
use async_trait::async_trait;
use solojourn_protocol::{
    Conversation, Message, MessageKind, MessageReaction, NewPost, Notification, Paginated, Post,
};

/// Bulk-fetch and command API.
///
/// Every call resolves the `{success, data, error}` envelope: a rejected
/// request surfaces as [`crate::SyncError::Rejected`].
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetches one page of the feed.
    async fn get_posts(&self, page: u32, limit: u32) -> SyncResult<Paginated<Post>>;

    /// Creates a post and returns the canonical server record.
    async fn create_post(&self, post: &NewPost) -> SyncResult<Post>;

    /// Likes a post.
    async fn like_post(&self, post_id: &str) -> SyncResult<()>;

    /// Removes a like.
    async fn unlike_post(&self, post_id: &str) -> SyncResult<()>;

    /// Bookmarks a post.
    async fn bookmark_post(&self, post_id: &str) -> SyncResult<()>;

    /// Removes a bookmark.
    async fn unbookmark_post(&self, post_id: &str) -> SyncResult<()>;

    /// Fetches the conversation list.
    async fn get_conversations(&self) -> SyncResult<Vec<Conversation>>;

    /// Fetches one page of a conversation's history.
    async fn get_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Paginated<Message>>;

    /// Sends a message and returns the canonical server record.
    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> SyncResult<Message>;

    /// Marks a message as read.
    async fn mark_message_as_read(&self, message_id: &str) -> SyncResult<()>;

    /// Adds (or replaces) the signed-in user's reaction to a message.
    async fn react_to_message(&self, message_id: &str, emoji: &str)
        -> SyncResult<MessageReaction>;

    /// Fetches one page of notifications.
    async fn get_notifications(&self, page: u32, limit: u32)
        -> SyncResult<Paginated<Notification>>;

    /// Marks one notification as read.
    async fn mark_notification_as_read(&self, notification_id: &str) -> SyncResult<()>;

    /// Marks every notification as read.
    async fn mark_all_notifications_as_read(&self) -> SyncResult<()>;
}
