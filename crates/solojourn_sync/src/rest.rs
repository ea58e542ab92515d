//! HTTP implementation of [`ApiClient`].
//!
//! The actual HTTP library is abstracted behind [`HttpClient`] so the
//! request mapping and envelope decoding can be exercised without a network.

use crate::api::ApiClient;
use crate::error::{SyncError, SyncResult};
use crate::storage::SessionStorage;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::json;
use solojourn_protocol::{
    ApiResponse, Conversation, Message, MessageKind, MessageReaction, NewPost, Notification,
    Paginated, Post,
};
use tracing::warn;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// A single HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Bearer token for the `Authorization` header.
    pub bearer: Option<String>,
    /// JSON body.
    pub body: Option<Vec<u8>>,
}

/// HTTP client abstraction.
///
/// Implement this trait to plug in an HTTP library. Transport-level failures
/// are returned as `Err(description)`; the response body is returned as-is.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs the request and returns the response body.
    async fn execute(&self, request: HttpRequest) -> Result<Vec<u8>, String>;
}

/// REST API client.
pub struct RestApi<C: HttpClient> {
    base_url: String,
    client: C,
    storage: Option<SessionStorage>,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> RestApi<C> {
    /// Creates a client for `base_url` (e.g. `https://api.solojourn.com`).
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            storage: None,
            last_error: RwLock::new(None),
        }
    }

    /// Attaches the session storage the bearer token is read from.
    pub fn with_storage(mut self, storage: SessionStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> SyncResult<Vec<u8>> {
        let bearer = match &self.storage {
            Some(storage) => storage.user_token()?,
            None => None,
        };
        let request = HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            bearer,
            body: body.map(|b| serde_json::to_vec(&b)).transpose()?,
        };

        match self.client.execute(request).await {
            Ok(bytes) => {
                *self.last_error.write() = None;
                Ok(bytes)
            }
            Err(e) => {
                warn!(method = method.as_str(), path, error = %e, "request failed");
                *self.last_error.write() = Some(e.clone());
                Err(SyncError::Http(e))
            }
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> SyncResult<T> {
        let bytes = self.send(method, path, body).await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)?;
        envelope.into_data().map_err(SyncError::Rejected)
    }

    /// For command endpoints only `success` matters; `data` may be absent.
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> SyncResult<()> {
        let bytes = self.send(method, path, body).await?;
        let envelope: ApiResponse<serde_json::Value> = serde_json::from_slice(&bytes)?;
        if envelope.success {
            Ok(())
        } else {
            Err(SyncError::Rejected(
                envelope
                    .error
                    .or(envelope.message)
                    .unwrap_or_else(|| "request failed".into()),
            ))
        }
    }
}

#[async_trait]
impl<C: HttpClient> ApiClient for RestApi<C> {
    async fn get_posts(&self, page: u32, limit: u32) -> SyncResult<Paginated<Post>> {
        self.call(Method::Get, &format!("/posts?page={page}&limit={limit}"), None)
            .await
    }

    async fn create_post(&self, post: &NewPost) -> SyncResult<Post> {
        self.call(Method::Post, "/posts", Some(serde_json::to_value(post)?))
            .await
    }

    async fn like_post(&self, post_id: &str) -> SyncResult<()> {
        self.command(Method::Post, &format!("/posts/{post_id}/like"), None)
            .await
    }

    async fn unlike_post(&self, post_id: &str) -> SyncResult<()> {
        self.command(Method::Post, &format!("/posts/{post_id}/unlike"), None)
            .await
    }

    async fn bookmark_post(&self, post_id: &str) -> SyncResult<()> {
        self.command(Method::Post, &format!("/posts/{post_id}/bookmark"), None)
            .await
    }

    async fn unbookmark_post(&self, post_id: &str) -> SyncResult<()> {
        self.command(Method::Post, &format!("/posts/{post_id}/unbookmark"), None)
            .await
    }

    async fn get_conversations(&self) -> SyncResult<Vec<Conversation>> {
        self.call(Method::Get, "/messages/conversations", None).await
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<Paginated<Message>> {
        self.call(
            Method::Get,
            &format!("/messages/conversations/{conversation_id}?page={page}&limit={limit}"),
            None,
        )
        .await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> SyncResult<Message> {
        let body = json!({
            "conversationId": conversation_id,
            "content": content,
            "type": kind,
        });
        self.call(Method::Post, "/messages", Some(body)).await
    }

    async fn mark_message_as_read(&self, message_id: &str) -> SyncResult<()> {
        self.command(Method::Put, &format!("/messages/{message_id}/read"), None)
            .await
    }

    async fn react_to_message(
        &self,
        message_id: &str,
        emoji: &str,
    ) -> SyncResult<MessageReaction> {
        self.call(
            Method::Post,
            &format!("/messages/{message_id}/reactions"),
            Some(json!({ "emoji": emoji })),
        )
        .await
    }

    async fn get_notifications(
        &self,
        page: u32,
        limit: u32,
    ) -> SyncResult<Paginated<Notification>> {
        self.call(
            Method::Get,
            &format!("/notifications?page={page}&limit={limit}"),
            None,
        )
        .await
    }

    async fn mark_notification_as_read(&self, notification_id: &str) -> SyncResult<()> {
        self.command(
            Method::Put,
            &format!("/notifications/{notification_id}/read"),
            None,
        )
        .await
    }

    async fn mark_all_notifications_as_read(&self) -> SyncResult<()> {
        self.command(Method::Put, "/notifications/read-all", None)
            .await
    }
}
