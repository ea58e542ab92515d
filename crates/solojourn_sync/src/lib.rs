//! # SoloJourn Sync
//!
//! Real-time synchronization core for the SoloJourn client.
//!
//! This crate provides:
//! - Socket client state machine
//!   (uninitialized → connecting → connected → disconnected → reconnecting → failed)
//! - Bounded reconnection with exponential backoff
//! - Typed publish/subscribe over inbound events
//! - Feed, messaging and notification stores with pending overlays
//! - Typing indicators with a local silence timeout
//! - Reference-counted presence sessions
//! - REST collaborator trait with HTTP-backed and in-memory implementations
//! - Session token storage
//!
//! ## Architecture
//!
//! The REST API is the source of truth for bulk state; the event stream
//! only carries deltas. Each store loads a snapshot over REST, then merges
//! pushed events into it:
//! 1. Load a page (replaces local state for that slice)
//! 2. Merge pushed events by id (missing ids are ignored)
//! 3. After a disconnect, mark the slice stale until the next load
//!
//! Missed events are never replayed. A store that observed
//! `socket:disconnected` must be reloaded to resynchronize.
//!
//! ## Key Invariants
//!
//! - Exactly one live connection per client
//! - Counters are floored at zero; broadcast counters overwrite local ones
//! - A sent message enters its list once, on its `message:new` echo
//! - Failed mutations leave no trace in the rendered view
//! - The unread counter equals the number of unread notifications shown

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod bus;
mod client;
mod config;
mod error;
mod messages;
mod mock_api;
mod notifications;
mod pending;
mod posts;
mod presence;
mod rest;
mod storage;
mod transport;
mod typing;
mod websocket;

pub use api::ApiClient;
pub use bus::{EventBus, InboundPayload, SubscriptionId};
pub use client::{ConnectionState, SocketClient};
pub use config::{
    ClientConfig, RetryConfig, API_URL_ENV, DEFAULT_API_URL, DEFAULT_SOCKET_URL, SOCKET_URL_ENV,
};
pub use error::{SyncError, SyncResult};
pub use messages::{MessageStore, PendingMessage};
pub use mock_api::{ApiOp, MockApi};
pub use notifications::{NoopPushRegistrar, NotificationStore, PushRegistrar};
pub use pending::CorrelationId;
pub use posts::PostStore;
pub use presence::{EventSubscription, Presence, PresenceGuard};
pub use rest::{HttpClient, HttpRequest, Method, RestApi};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, SessionStorage, TOKEN_KEY};
pub use transport::{Connection, Connector, InboundFrame, MockConnector};
pub use typing::TypingTracker;
pub use websocket::{WsConnector, SOCKET_ID_HEADER};
