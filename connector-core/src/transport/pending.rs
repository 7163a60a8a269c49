//! `PendingPost` — a live correlation entry inside `PostClient`.
//!
//! Condvar-based, matching the teacher's general preference for
//! `parking_lot::Mutex` + manual condition signaling over channels when a
//! single slot needs exactly one writer and one waiter (the same shape as
//! `risk/rate_limiter.rs`'s `last_refill` mutex, here holding a one-shot
//! response slot instead of a timestamp).

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

struct Slot {
    response: Option<Value>,
    timed_out: bool,
}

/// One outstanding `post()` call, keyed by request id in `PostClient`'s
/// correlation map. Cloning shares the same underlying slot (`Arc`), so the
/// reader thread and the blocked caller observe the same state.
#[derive(Clone)]
pub struct PendingPost {
    slot: Arc<Mutex<Slot>>,
    condvar: Arc<Condvar>,
}

impl PendingPost {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                response: None,
                timed_out: false,
            })),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Called from the reader thread when a matching `channel:"post"` frame
    /// arrives. A late response (arriving after the waiter already timed
    /// out) still completes the slot — logged by the caller, never dropped
    /// silently, per §4.3 "no leak".
    pub fn complete(&self, response: Value) {
        let mut slot = self.slot.lock();
        slot.response = Some(response);
        self.condvar.notify_all();
    }

    /// Blocks the calling thread until a response arrives or `timeout`
    /// elapses. Returns `None` on timeout and marks the slot `timed_out`.
    pub fn wait(&self, timeout: Duration) -> Option<Value> {
        let mut slot = self.slot.lock();
        if slot.response.is_none() {
            let result = self.condvar.wait_for(&mut slot, timeout);
            if result.timed_out() && slot.response.is_none() {
                slot.timed_out = true;
            }
        }
        slot.response.take()
    }

    /// Called by `close()`/stale-detection to fail every outstanding post
    /// with a synthetic timeout, unblocking any caller still in `wait`.
    pub fn fail_with_timeout(&self) {
        let mut slot = self.slot.lock();
        slot.timed_out = true;
        self.condvar.notify_all();
    }
}

impl Default for PendingPost {
    fn default() -> Self {
        Self::new()
    }
}
