//! # SoloJourn Protocol
//!
//! Wire records and event unions for the SoloJourn real-time sync layer.
//!
//! This crate provides:
//! - Domain records pushed by the server or returned by the REST API
//!   (`Post`, `Message`, `Conversation`, `Notification`, ...)
//! - The inbound (`InboundEvent`) and outbound (`OutboundEvent`) event unions,
//!   keyed by `EventKind`
//! - JSON frame encoding/decoding (`{"event": <name>, "data": <payload>}`)
//! - REST envelope types (`ApiResponse`, `Paginated`, `Ack`)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod events;
mod messaging;
mod models;
mod notification;

pub use envelope::{Ack, ApiResponse, Paginated, Pagination};
pub use error::{ProtocolError, ProtocolResult};
pub use events::{
    decode_inbound, decode_outbound, encode_inbound, encode_outbound, EventKind, InboundEvent,
    LocationShared, MessageRead, OutboundEvent, PostCommented, PostLiked, PresenceStatus,
    ReconnectFailed, SocketConnected, SocketDisconnected, TypingStatus, TypingUpdate,
};
pub use messaging::{Conversation, Message, MessageKind, MessageReaction, ReplySnapshot};
pub use models::{Coordinates, NewPost, Place, Post, PostKind, UserRef};
pub use notification::{Notification, NotificationKind};
