//! Property-based test generators using proptest.
//!
//! Provides strategies for operation sequences that the stores must absorb
//! without breaking their counters.

use crate::fixtures;
use proptest::prelude::*;
use solojourn_protocol::{Notification, Post};

/// One step applied to a single post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeOp {
    /// Local like.
    Like,
    /// Local unlike.
    Unlike,
    /// Request failure before the next local toggle.
    FailNext,
    /// Authoritative `post:liked` broadcast.
    Broadcast(u32),
}

/// One step applied to the notification list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOp {
    /// A `notification:new` push.
    Arrive {
        /// Notification id (may collide with an existing one).
        id: String,
        /// Read flag of the pushed record.
        is_read: bool,
    },
    /// Mark the notification at this index (modulo length) as read.
    MarkRead(usize),
    /// Mark everything as read.
    MarkAll,
    /// Fail the next mark request.
    FailNext,
}

/// Strategy for like/unlike sequences.
pub fn like_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<LikeOp>> {
    let op = prop_oneof![
        4 => Just(LikeOp::Like),
        4 => Just(LikeOp::Unlike),
        1 => Just(LikeOp::FailNext),
        1 => (0u32..5).prop_map(LikeOp::Broadcast),
    ];
    prop::collection::vec(op, 0..max_len)
}

/// Strategy for notification sequences over a small id space.
pub fn notification_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<NotificationOp>> {
    let op = prop_oneof![
        4 => ((1u8..12), any::<bool>()).prop_map(|(n, is_read)| NotificationOp::Arrive {
            id: format!("n{n}"),
            is_read,
        }),
        3 => (0usize..16).prop_map(NotificationOp::MarkRead),
        1 => Just(NotificationOp::MarkAll),
        1 => Just(NotificationOp::FailNext),
    ];
    prop::collection::vec(op, 0..max_len)
}

/// Strategy for an initial notification page with unique ids.
pub fn notification_page_strategy(max_len: usize) -> impl Strategy<Value = Vec<Notification>> {
    prop::collection::vec(any::<bool>(), 0..max_len).prop_map(|flags| {
        flags
            .into_iter()
            .enumerate()
            .map(|(i, is_read)| fixtures::notification(&format!("n{}", i + 1), is_read))
            .collect()
    })
}

/// Strategy for a single post with a random starting like counter.
pub fn post_strategy() -> impl Strategy<Value = Post> {
    (0u32..4, any::<bool>()).prop_map(|(likes, is_liked)| {
        let mut post = fixtures::post("p1", likes);
        // A liked post carries at least its own like.
        post.is_liked = is_liked && likes > 0;
        post
    })
}
