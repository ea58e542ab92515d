//! Async helpers for tests.

/// Yields to the scheduler enough times for spawned reader and recorder
/// tasks to drain what is queued for them.
///
/// Works on both the current-thread and the paused-clock runtime.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn settle_runs_spawned_tasks() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        settle().await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
