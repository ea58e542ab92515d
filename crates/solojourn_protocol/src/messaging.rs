//! Direct-messaging records.

use crate::models::UserRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image reference.
    Image,
    /// Audio clip reference.
    Audio,
    /// Shared location.
    Location,
}

/// A reaction left on a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReaction {
    /// Reaction ID.
    pub id: String,
    /// Message the reaction belongs to.
    pub message_id: String,
    /// Reacting user.
    pub user_id: String,
    /// The emoji.
    pub emoji: String,
    /// When the reaction was left.
    pub created_at: DateTime<Utc>,
}

/// Copy of the message being replied to.
///
/// This is a snapshot taken when the reply was written; later edits to the
/// original do not change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    /// ID of the original message.
    pub id: String,
    /// Content of the original at reply time.
    pub content: String,
    /// Sender of the original.
    pub sender_id: String,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned message ID.
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Sender.
    pub sender_id: String,
    /// Receiver (empty for group conversations).
    #[serde(default)]
    pub receiver_id: String,
    /// Payload.
    pub content: String,
    /// Payload kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Read receipt.
    #[serde(default)]
    pub is_read: bool,
    /// Send time.
    pub created_at: DateTime<Utc>,
    /// Reactions, at most one per user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<MessageReaction>,
    /// Reply reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplySnapshot>,
}

impl Message {
    /// Adds a reaction, replacing any earlier reaction by the same user.
    pub fn add_reaction(&mut self, reaction: MessageReaction) {
        self.reactions.retain(|r| r.user_id != reaction.user_id);
        self.reactions.push(reaction);
    }

    /// Returns the reaction left by `user_id`, if any.
    pub fn reaction_by(&self, user_id: &str) -> Option<&MessageReaction> {
        self.reactions.iter().find(|r| r.user_id == user_id)
    }

    /// Builds a reply snapshot of this message.
    pub fn snapshot(&self) -> ReplySnapshot {
        ReplySnapshot {
            id: self.id.clone(),
            content: self.content.clone(),
            sender_id: self.sender_id.clone(),
        }
    }
}

/// Summary of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation ID.
    pub id: String,
    /// Participants.
    #[serde(default)]
    pub participants: Vec<UserRef>,
    /// Most recently merged message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Unread badge.
    #[serde(default)]
    pub unread_count: u32,
    /// Whether this is a group conversation.
    #[serde(default)]
    pub is_group: bool,
    /// Group name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Group avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_avatar: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity time.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            receiver_id: "u1".into(),
            content: "on my way".into(),
            kind: MessageKind::Text,
            is_read: false,
            created_at: Utc::now(),
            reactions: Vec::new(),
            reply_to: None,
        }
    }

    fn reaction(id: &str, user: &str, emoji: &str) -> MessageReaction {
        MessageReaction {
            id: id.into(),
            message_id: "m1".into(),
            user_id: user.into(),
            emoji: emoji.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reaction_from_same_user_replaces_previous() {
        let mut msg = message();
        msg.add_reaction(reaction("r1", "u1", "👍"));
        msg.add_reaction(reaction("r2", "u3", "🔥"));
        msg.add_reaction(reaction("r3", "u1", "❤️"));

        assert_eq!(msg.reactions.len(), 2);
        assert_eq!(msg.reaction_by("u1").unwrap().emoji, "❤️");
        assert_eq!(msg.reaction_by("u3").unwrap().emoji, "🔥");
    }

    #[test]
    fn reply_snapshot_is_detached_copy() {
        let mut original = message();
        let snapshot = original.snapshot();
        original.content = "edited".into();

        assert_eq!(snapshot.content, "on my way");
        assert_eq!(snapshot.sender_id, "u2");
    }

    #[test]
    fn message_type_field_on_wire() {
        let mut msg = message();
        msg.kind = MessageKind::Location;
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "location");
        assert_eq!(value["conversationId"], "c1");
        assert!(value.get("reactions").is_none());
    }
}
