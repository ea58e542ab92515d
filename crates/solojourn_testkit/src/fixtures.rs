//! Deterministic record fixtures.
//!
//! Every fixture is stamped relative to [`base_time`], so two calls with the
//! same arguments produce equal records.

use chrono::{DateTime, Duration, TimeZone, Utc};
use solojourn_protocol::{
    Conversation, Message, MessageKind, Notification, NotificationKind, Post, PostKind, UserRef,
};

/// User id the fixtures treat as the local user.
pub const SELF_ID: &str = "me";

/// Fixed reference time for every fixture.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Trailing digits of an id, used to spread timestamps.
fn ordinal(id: &str) -> i64 {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// A user reference named after its id.
pub fn user(id: &str) -> UserRef {
    UserRef::new(id, format!("User {id}"))
}

/// A text post by `u1` with the given like counter.
pub fn post(id: &str, likes: u32) -> Post {
    let created_at = base_time() - Duration::minutes(ordinal(id));
    Post {
        id: id.to_string(),
        user_id: "u1".to_string(),
        user: Some(user("u1")),
        content: format!("post {id}"),
        images: Vec::new(),
        location: None,
        tags: Vec::new(),
        likes,
        comments: 0,
        shares: 0,
        is_liked: false,
        is_bookmarked: false,
        created_at,
        updated_at: created_at,
        kind: PostKind::Text,
    }
}

/// `n` posts `p1..=pn`, newest first.
pub fn feed(n: usize) -> Vec<Post> {
    (1..=n).map(|i| post(&format!("p{i}"), 0)).collect()
}

/// A one-to-one conversation between [`SELF_ID`] and `other_user_id`.
pub fn conversation(id: &str, other_user_id: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        participants: vec![user(SELF_ID), user(other_user_id)],
        last_message: None,
        unread_count: 0,
        is_group: false,
        group_name: None,
        group_avatar: None,
        created_at: base_time(),
        updated_at: base_time(),
    }
}

/// An unread text message. The receiver is [`SELF_ID`] unless the sender
/// is.
pub fn message(id: &str, conversation_id: &str, sender_id: &str) -> Message {
    let receiver_id = if sender_id == SELF_ID { "u2" } else { SELF_ID };
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        content: format!("message {id}"),
        kind: MessageKind::Text,
        is_read: false,
        created_at: base_time() + Duration::seconds(ordinal(id)),
        reactions: Vec::new(),
        reply_to: None,
    }
}

/// A like notification for [`SELF_ID`].
pub fn notification(id: &str, is_read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: SELF_ID.to_string(),
        kind: NotificationKind::Like,
        title: "New Like".to_string(),
        message: format!("notification {id}"),
        data: Some(serde_json::json!({ "postId": "p1" })),
        is_read,
        created_at: base_time() - Duration::minutes(ordinal(id)),
        action_user: Some(user("u2")),
    }
}

/// `n` notifications `n1..=nn`; every `read_every`-th one is read.
pub fn notifications(n: usize, read_every: usize) -> Vec<Notification> {
    (1..=n)
        .map(|i| notification(&format!("n{i}"), read_every != 0 && i % read_every == 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_is_newest_first() {
        let posts = feed(3);
        assert_eq!(posts[0].id, "p1");
        assert!(posts[0].created_at > posts[2].created_at);
    }

    #[test]
    fn fixtures_are_deterministic() {
        assert_eq!(message("m1", "c1", "u2"), message("m1", "c1", "u2"));
        assert_eq!(message("m1", "c1", SELF_ID).receiver_id, "u2");
        assert_eq!(
            notifications(4, 2).iter().filter(|n| n.is_read).count(),
            2
        );
    }
}
