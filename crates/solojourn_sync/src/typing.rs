//! Typing indicators with a local silence timeout.
//!
//! The wire protocol has no expiry for `message:typing`, so every
//! (conversation, user) key gets a cancellable timer that clears the flag
//! after the configured silence window. A fresh `isTyping: true` resets the
//! timer. Each timer carries the generation it was armed with; a timer whose
//! generation is stale does nothing even if it fires.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type Key = (String, String);

#[derive(Debug)]
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct TypingState {
    typing: HashMap<String, BTreeSet<String>>,
    timers: HashMap<Key, Timer>,
    next_generation: u64,
}

/// Tracks which users are typing in which conversation.
#[derive(Debug)]
pub struct TypingTracker {
    timeout: Duration,
    state: Arc<Mutex<TypingState>>,
}

impl TypingTracker {
    /// Creates a tracker with the given silence window.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Arc::new(Mutex::new(TypingState::default())),
        }
    }

    /// Applies a typing update. Must be called inside a tokio runtime when
    /// `is_typing` is true.
    pub fn update(&self, conversation_id: &str, user_id: &str, is_typing: bool) {
        let key = (conversation_id.to_string(), user_id.to_string());
        let mut state = self.state.lock();

        if let Some(timer) = state.timers.remove(&key) {
            timer.handle.abort();
        }

        if !is_typing {
            remove_user(&mut state, &key);
            return;
        }

        state
            .typing
            .entry(key.0.clone())
            .or_default()
            .insert(key.1.clone());

        state.next_generation += 1;
        let generation = state.next_generation;
        let weak: Weak<Mutex<TypingState>> = Arc::downgrade(&self.state);
        let timeout = self.timeout;
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(state) = weak.upgrade() else {
                return;
            };
            let mut state = state.lock();
            let current = state.timers.get(&timer_key).map(|t| t.generation);
            if current == Some(generation) {
                state.timers.remove(&timer_key);
                remove_user(&mut state, &timer_key);
                debug!(conversation = %timer_key.0, user = %timer_key.1, "typing indicator expired");
            }
        });
        state.timers.insert(key, Timer { generation, handle });
    }

    /// Returns the users currently typing in a conversation, sorted.
    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        self.state
            .lock()
            .typing
            .get(conversation_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every conversation with at least one typing user.
    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.state
            .lock()
            .typing
            .iter()
            .map(|(conv, users)| (conv.clone(), users.iter().cloned().collect()))
            .collect()
    }

    /// Clears every indicator and cancels every timer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for (_, timer) in state.timers.drain() {
            timer.handle.abort();
        }
        state.typing.clear();
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        self.clear();
    }
}

fn remove_user(state: &mut TypingState, key: &Key) {
    if let Some(users) = state.typing.get_mut(&key.0) {
        users.remove(&key.1);
        if users.is_empty() {
            state.typing.remove(&key.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn typing_expires_after_silence() {
        let tracker = TypingTracker::new(Duration::from_secs(5));
        tracker.update("c1", "u2", true);
        assert_eq!(tracker.typing_users("c1"), vec!["u2".to_string()]);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(tracker.typing_users("c1").is_empty());
        assert!(tracker.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_update_resets_timer() {
        let tracker = TypingTracker::new(Duration::from_secs(5));
        tracker.update("c1", "u2", true);

        tokio::time::sleep(Duration::from_secs(3)).await;
        tracker.update("c1", "u2", true);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(tracker.typing_users("c1"), vec!["u2".to_string()]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(tracker.typing_users("c1").is_empty());
    }

    #[tokio::test]
    async fn explicit_stop_clears_one_user() {
        let tracker = TypingTracker::new(Duration::from_secs(5));
        tracker.update("c1", "u2", true);
        tracker.update("c1", "u3", true);
        tracker.update("c1", "u2", false);

        assert_eq!(tracker.typing_users("c1"), vec!["u3".to_string()]);
        tracker.update("c9", "u4", false);
        assert!(tracker.typing_users("c9").is_empty());
    }
}
