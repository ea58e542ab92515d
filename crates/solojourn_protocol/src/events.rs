//! Named events multiplexed over the event transport.
//!
//! Every frame on the wire is a JSON object `{"event": <name>, "data": <payload>}`.
//! Inbound frames decode into [`InboundEvent`], outbound actions encode from
//! [`OutboundEvent`]. [`EventKind`] is the subscription key for inbound events.
//!
//! The `socket:*` lifecycle events are synthesized by the client itself. They
//! share the inbound union so that subscribers see one stream, but they have
//! no wire form.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messaging::Message;
use crate::models::Coordinates;
use crate::notification::Notification;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription key: one variant per inbound event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// `socket:connected`
    SocketConnected,
    /// `socket:disconnected`
    SocketDisconnected,
    /// `socket:reconnect_failed`
    ReconnectFailed,
    /// `message:new`
    MessageNew,
    /// `message:read`
    MessageRead,
    /// `message:typing`
    MessageTyping,
    /// `notification:new`
    NotificationNew,
    /// `post:liked`
    PostLiked,
    /// `post:commented`
    PostCommented,
    /// `user:online`
    UserOnline,
    /// `user:offline`
    UserOffline,
    /// `safety:alert`
    SafetyAlert,
    /// `location:shared`
    LocationShared,
}

impl EventKind {
    /// All inbound event kinds.
    pub const ALL: [EventKind; 13] = [
        EventKind::SocketConnected,
        EventKind::SocketDisconnected,
        EventKind::ReconnectFailed,
        EventKind::MessageNew,
        EventKind::MessageRead,
        EventKind::MessageTyping,
        EventKind::NotificationNew,
        EventKind::PostLiked,
        EventKind::PostCommented,
        EventKind::UserOnline,
        EventKind::UserOffline,
        EventKind::SafetyAlert,
        EventKind::LocationShared,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SocketConnected => "socket:connected",
            EventKind::SocketDisconnected => "socket:disconnected",
            EventKind::ReconnectFailed => "socket:reconnect_failed",
            EventKind::MessageNew => "message:new",
            EventKind::MessageRead => "message:read",
            EventKind::MessageTyping => "message:typing",
            EventKind::NotificationNew => "notification:new",
            EventKind::PostLiked => "post:liked",
            EventKind::PostCommented => "post:commented",
            EventKind::UserOnline => "user:online",
            EventKind::UserOffline => "user:offline",
            EventKind::SafetyAlert => "safety:alert",
            EventKind::LocationShared => "location:shared",
        }
    }

    /// Returns true for lifecycle events synthesized by the client.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            EventKind::SocketConnected | EventKind::SocketDisconnected | EventKind::ReconnectFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEvent(s.to_string()))
    }
}

/// Payload of `socket:connected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConnected {
    /// Server-assigned socket ID.
    pub socket_id: String,
}

/// Payload of `socket:disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketDisconnected {
    /// Why the connection ended.
    pub reason: String,
    /// Whether the client asked for the disconnect.
    pub deliberate: bool,
}

/// Payload of `socket:reconnect_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectFailed {
    /// Number of retries that were made.
    pub attempts: u32,
}

/// Payload of inbound `message:read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    /// Message that was read.
    pub message_id: String,
    /// User who read it.
    pub read_by: String,
}

/// Payload of inbound `message:typing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    /// Conversation being typed in.
    pub conversation_id: String,
    /// Typing user.
    pub user_id: String,
    /// Whether the user started (`true`) or stopped (`false`).
    pub is_typing: bool,
}

/// Payload of `post:liked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLiked {
    /// Liked post.
    pub post_id: String,
    /// User who liked it.
    pub user_id: String,
    /// Authoritative like count after the like.
    pub likes_count: u32,
}

/// Payload of `post:commented`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCommented {
    /// Commented post.
    pub post_id: String,
    /// The comment as sent by the server.
    #[serde(default)]
    pub comment: serde_json::Value,
}

/// Payload of `location:shared`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationShared {
    /// Sharing user.
    pub user_id: String,
    /// Shared position.
    pub location: Coordinates,
}

/// An event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    /// The transport connected.
    #[serde(skip)]
    Connected(SocketConnected),
    /// The transport disconnected.
    #[serde(skip)]
    Disconnected(SocketDisconnected),
    /// Reconnection gave up.
    #[serde(skip)]
    ReconnectFailed(ReconnectFailed),
    /// A message was posted to a conversation.
    #[serde(rename = "message:new")]
    MessageNew(Message),
    /// A message was read.
    #[serde(rename = "message:read")]
    MessageRead(MessageRead),
    /// A user started or stopped typing.
    #[serde(rename = "message:typing")]
    Typing(TypingUpdate),
    /// A notification was created.
    #[serde(rename = "notification:new")]
    NotificationNew(Notification),
    /// A post's like count changed.
    #[serde(rename = "post:liked")]
    PostLiked(PostLiked),
    /// A post received a comment.
    #[serde(rename = "post:commented")]
    PostCommented(PostCommented),
    /// A user came online.
    #[serde(rename = "user:online")]
    UserOnline(String),
    /// A user went offline.
    #[serde(rename = "user:offline")]
    UserOffline(String),
    /// A safety alert was raised nearby.
    #[serde(rename = "safety:alert")]
    SafetyAlert(serde_json::Value),
    /// A contact shared their location.
    #[serde(rename = "location:shared")]
    LocationShared(LocationShared),
}

impl InboundEvent {
    /// Returns the subscription key of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Connected(_) => EventKind::SocketConnected,
            InboundEvent::Disconnected(_) => EventKind::SocketDisconnected,
            InboundEvent::ReconnectFailed(_) => EventKind::ReconnectFailed,
            InboundEvent::MessageNew(_) => EventKind::MessageNew,
            InboundEvent::MessageRead(_) => EventKind::MessageRead,
            InboundEvent::Typing(_) => EventKind::MessageTyping,
            InboundEvent::NotificationNew(_) => EventKind::NotificationNew,
            InboundEvent::PostLiked(_) => EventKind::PostLiked,
            InboundEvent::PostCommented(_) => EventKind::PostCommented,
            InboundEvent::UserOnline(_) => EventKind::UserOnline,
            InboundEvent::UserOffline(_) => EventKind::UserOffline,
            InboundEvent::SafetyAlert(_) => EventKind::SafetyAlert,
            InboundEvent::LocationShared(_) => EventKind::LocationShared,
        }
    }
}

/// Body of outbound `message:typing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    /// Conversation being typed in.
    pub conversation_id: String,
    /// Whether the user is typing.
    pub is_typing: bool,
}

/// Presence status published with `user:presence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Active.
    Online,
    /// Idle.
    Away,
    /// Signed off.
    Offline,
}

/// A fire-and-forget action published to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    /// Start receiving a conversation's room traffic.
    #[serde(rename = "conversation:join")]
    JoinConversation(String),
    /// Stop receiving a conversation's room traffic.
    #[serde(rename = "conversation:leave")]
    LeaveConversation(String),
    /// Relay a server-confirmed message to the room. The message carries
    /// its own `conversationId`.
    #[serde(rename = "message:send")]
    SendMessage(Message),
    /// Relay a read receipt.
    #[serde(rename = "message:read")]
    MarkRead(String),
    /// Relay the local user's typing state.
    #[serde(rename = "message:typing")]
    Typing(TypingStatus),
    /// Share the device position.
    #[serde(rename = "location:share")]
    ShareLocation(Coordinates),
    /// Raise a safety alert.
    #[serde(rename = "safety:alert")]
    SafetyAlert(serde_json::Value),
    /// Update the user's presence.
    #[serde(rename = "user:presence")]
    Presence(PresenceStatus),
}

impl OutboundEvent {
    /// Returns the wire name.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinConversation(_) => "conversation:join",
            OutboundEvent::LeaveConversation(_) => "conversation:leave",
            OutboundEvent::SendMessage(_) => "message:send",
            OutboundEvent::MarkRead(_) => "message:read",
            OutboundEvent::Typing(_) => "message:typing",
            OutboundEvent::ShareLocation(_) => "location:share",
            OutboundEvent::SafetyAlert(_) => "safety:alert",
            OutboundEvent::Presence(_) => "user:presence",
        }
    }
}

#[derive(Deserialize)]
struct FrameHead {
    event: String,
}

/// Decodes an inbound JSON frame.
///
/// Unknown names and the client-local `socket:*` names are rejected with
/// [`ProtocolError::UnknownEvent`].
pub fn decode_inbound(text: &str) -> ProtocolResult<InboundEvent> {
    let head: FrameHead = serde_json::from_str(text)?;
    let kind: EventKind = head.event.parse()?;
    if kind.is_local() {
        return Err(ProtocolError::UnknownEvent(head.event));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encodes an inbound event as a JSON frame (used by servers and test doubles).
pub fn encode_inbound(event: &InboundEvent) -> ProtocolResult<String> {
    let kind = event.kind();
    if kind.is_local() {
        return Err(ProtocolError::LocalOnly(kind.as_str().to_string()));
    }
    Ok(serde_json::to_string(event)?)
}

/// Encodes an outbound action as a JSON frame.
pub fn encode_outbound(event: &OutboundEvent) -> ProtocolResult<String> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes an outbound JSON frame (used by servers and test doubles).
pub fn decode_outbound(text: &str) -> ProtocolResult<OutboundEvent> {
    Ok(serde_json::from_str(text)?)
}
