//! Correlation ids for locally initiated mutations.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one locally initiated mutation while it awaits confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending mutation of one boolean field (and its counter, if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingToggle {
    pub id: CorrelationId,
    /// The value the field will have once confirmed.
    pub target: bool,
    /// Whether the view still applies the paired counter delta. Cleared when
    /// an authoritative count arrives while the toggle is in flight.
    pub counted: bool,
}

impl PendingToggle {
    pub fn new(target: bool) -> Self {
        Self {
            id: CorrelationId::new(),
            target,
            counted: true,
        }
    }
}

/// Undoes a local reservation when dropped unless disarmed.
///
/// Held across a request's await so that a caller dropping the future
/// (timeout, `select!`, task abort) still releases the overlay or loading
/// flag it set.
#[must_use = "dropping the guard runs the undo immediately"]
pub(crate) struct Rollback<F: FnOnce()> {
    undo: Option<F>,
}

impl<F: FnOnce()> Rollback<F> {
    pub fn new(undo: F) -> Self {
        Self { undo: Some(undo) }
    }

    /// Keeps the reservation; the caller settles it itself.
    pub fn disarm(mut self) {
        self.undo = None;
    }
}

impl<F: FnOnce()> Drop for Rollback<F> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn ids_are_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn rollback_runs_on_drop_only_when_armed() {
        let undone = Cell::new(0);
        drop(Rollback::new(|| undone.set(undone.get() + 1)));
        assert_eq!(undone.get(), 1);

        Rollback::new(|| undone.set(undone.get() + 1)).disarm();
        assert_eq!(undone.get(), 1);
    }
}
