use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Opaque handle for one timeout registration. Cancelling a handle whose
/// entry already fired or was cancelled is a no-op, so completion and expiry
/// can never both consume the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeoutHandle(u64);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    expires_at_ms: u64,
    id: u64,
    slot: usize,
}

/// Priority queue of session deadlines, ordered by expiration ascending.
///
/// Cancellation is lazy: cancelled ids are dropped from the pending set and
/// their heap entries skipped when they surface, keeping both `register` and
/// `cancel` at O(log n) or better. The queue is drained by whoever drives
/// the sweep; it holds slot indices, not sessions.
#[derive(Debug, Default)]
pub struct TimeoutQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    pending: HashSet<u64>,
    next_id: u64,
}

impl TimeoutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, expires_at_ms: u64, slot: usize) -> TimeoutHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id);
        self.heap.push(Reverse(Entry {
            expires_at_ms,
            id,
            slot,
        }));
        TimeoutHandle(id)
    }

    /// No-op if the registration already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimeoutHandle) {
        self.pending.remove(&handle.0);
    }

    /// Pops every live entry whose deadline has passed, in deadline order.
    pub fn pop_expired(&mut self, now_ms: u64) -> Vec<(usize, TimeoutHandle)> {
        let mut expired = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if !is_expired(now_ms, entry.expires_at_ms) {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if self.pending.remove(&entry.id) {
                expired.push((entry.slot, TimeoutHandle(entry.id)));
            }
        }
        expired
    }

    /// Deadline of the earliest live registration, if any.
    pub fn next_deadline_ms(&mut self) -> Option<u64> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.pending.contains(&entry.id) {
                return Some(entry.expires_at_ms);
            }
            self.heap.pop();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

pub fn is_expired(now_ms: u64, expires_at_ms: u64) -> bool {
    now_ms >= expires_at_ms
}
