//! # SoloJourn Testkit
//!
//! Test utilities for the SoloJourn sync layer.
//!
//! This crate provides:
//! - Deterministic record fixtures (posts, conversations, messages,
//!   notifications)
//! - Property-based test generators using proptest
//! - Async helpers for driving event delivery in tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use solojourn_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn feed_loads() {
//!     let api = MockApi::new(SELF_ID).with_posts(feed(20));
//!     // ...
//!     settle().await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod runtime;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::runtime::*;
}

pub use fixtures::*;
pub use runtime::*;
