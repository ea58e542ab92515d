//! In-app notification records.

use crate::models::UserRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Someone liked a post.
    Like,
    /// Someone commented on a post.
    Comment,
    /// Someone followed the user.
    Follow,
    /// New direct message.
    Message,
    /// Safety alert.
    Safety,
    /// System announcement.
    System,
}

/// An in-app notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification ID.
    pub id: String,
    /// Recipient.
    #[serde(default)]
    pub user_id: String,
    /// Kind.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Title line.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Opaque payload (deep-link targets and the like).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Read state.
    #[serde(default)]
    pub is_read: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// User who triggered the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_user: Option<UserRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_notification_with_payload() {
        let json = r#"{
            "id": "1",
            "userId": "u1",
            "type": "like",
            "title": "New Like",
            "message": "Jane Smith liked your post",
            "data": {"postId": "1", "userId": "2"},
            "isRead": false,
            "createdAt": "2024-05-01T08:00:00Z"
        }"#;

        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind, NotificationKind::Like);
        assert_eq!(n.data.unwrap()["postId"], "1");
        assert!(n.action_user.is_none());
    }
}
