//! CLI command implementations.

pub mod listen;
pub mod simulate;
pub mod token;
