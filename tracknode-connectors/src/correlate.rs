//! Request/reply correlation for asynchronous device channels
//!
//! An outbound request carries a monotonically increasing id; the matching
//! reply arrives later on a shared inbound channel tagged with the same id.
//! [`ReplyWaiter`] owns one such correlation: `issue` stakes out the next
//! id, `fulfil` delivers a reply from the transport's receive task, and
//! `wait` blocks the requester until delivery or timeout.
//!
//! Only the single most recently issued id is awaited - a second `issue`
//! before the first reply lands abandons the earlier wait. That matches
//! the device's usage (requests are serialized by the caller), and stray
//! ids are ignored rather than treated as errors.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::debug;
use serde_json::Value;

struct Slot {
    next_id: u64,
    expected: u64,
    reply: Option<Value>,
}

/// One kind of correlated request (attributes or RPC), with its own id
/// sequence and its own single reply slot.
pub struct ReplyWaiter {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl ReplyWaiter {
    /// Create a waiter whose first issued id is `first_id`.
    pub fn new(first_id: u64) -> Self {
        Self {
            slot: Mutex::new(Slot {
                next_id: first_id,
                expected: first_id,
                reply: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Claim the next id and clear any stale reply. The returned id tags
    /// the outbound request.
    pub fn issue(&self) -> u64 {
        let mut slot = self.slot.lock().unwrap();
        let id = slot.next_id;
        slot.next_id += 1;
        slot.expected = id;
        slot.reply = None;
        id
    }

    /// Deliver a reply. Returns `true` when `id` is the one currently
    /// awaited; anything else is dropped (a late reply to an abandoned
    /// request, or noise).
    pub fn fulfil(&self, id: u64, value: Value) -> bool {
        let mut slot = self.slot.lock().unwrap();
        if slot.expected != id {
            debug!("dropping reply for id {id}, awaiting {}", slot.expected);
            return false;
        }
        slot.reply = Some(value);
        self.ready.notify_all();
        true
    }

    /// Block until the awaited reply lands or `timeout` elapses.
    /// `None` means no reply - an unknown outcome, not a failure.
    pub fn wait(&self, timeout: Duration) -> Option<Value> {
        let slot = self.slot.lock().unwrap();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |s| s.reply.is_none())
            .ok()?;
        slot.reply.take()
    }
}
