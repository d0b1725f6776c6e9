// conductor-worker/src/notify.rs
// ============================================================================
// Module: Run Wake Registry
// Description: Per-run `Notify` handles the drain loop waits on instead of
//              polling the event log.
// Purpose: Let event ingestion (webhook, operator action, job completion)
//          wake exactly the run it affected (§4.5 "Dispatch is
//          notify-driven; the periodic sweep is a backstop, not the
//          primary path").
// Dependencies: tokio
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use conductor_core::ids::RunId;
use tokio::sync::Notify;
use tokio::sync::mpsc;

/// Hands out a `Notify` per run id, created lazily on first use, and feeds
/// a channel the drain supervisor reads from (§2 "Dispatch is
/// notify-driven; the periodic sweep is a backstop, not the primary
/// path"). The per-run `Notify` handles serve callers that block on one
/// specific run (an HTTP long-poll, a test); the channel serves the
/// supervisor that doesn't yet know which runs exist.
pub struct RunWakeRegistry {
    handles: Mutex<HashMap<RunId, Arc<Notify>>>,
    feed: mpsc::UnboundedSender<RunId>,
    feed_rx: Mutex<Option<mpsc::UnboundedReceiver<RunId>>>,
}

impl Default for RunWakeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunWakeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (feed, feed_rx) = mpsc::unbounded_channel();
        Self { handles: Mutex::new(HashMap::new()), feed, feed_rx: Mutex::new(Some(feed_rx)) }
    }

    /// Returns the `Notify` for `run_id`, creating it if this is the first
    /// reference to this run since the process started.
    #[must_use]
    pub fn handle_for(&self, run_id: &RunId) -> Arc<Notify> {
        let mut handles = self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        handles.entry(run_id.clone()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    /// Wakes the drain task for `run_id`, if one is currently waiting, and
    /// pushes `run_id` onto the supervisor feed so a fresh drain task gets
    /// spawned even if nothing was waiting yet.
    pub fn wake(&self, run_id: &RunId) {
        if let Ok(handles) = self.handles.lock() {
            if let Some(notify) = handles.get(run_id) {
                notify.notify_one();
            }
        }
        // The supervisor may have shut down (receiver dropped); a send
        // failure here just means there is nothing left to wake.
        let _ = self.feed.send(run_id.clone());
    }

    /// Takes the supervisor's receiving half of the wake feed. Returns
    /// `None` if a supervisor has already taken it — at most one
    /// supervisor may drain this registry's feed.
    pub fn take_feed(&self) -> Option<mpsc::UnboundedReceiver<RunId>> {
        self.feed_rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
    }
}

#[cfg(test)]
mod tests {
    use super::RunWakeRegistry;
    use conductor_core::ids::RunId;

    #[tokio::test]
    async fn wake_resolves_a_pending_notified_wait() {
        let registry = RunWakeRegistry::new();
        let run_id = RunId::new("run_1");
        let notify = registry.handle_for(&run_id);

        registry.wake(&run_id);
        // notify_one() before notified() is buffered for the next waiter.
        notify.notified().await;
    }

    #[test]
    fn wake_on_unknown_run_is_a_harmless_no_op() {
        let registry = RunWakeRegistry::new();
        registry.wake(&RunId::new("run_missing"));
    }
}
