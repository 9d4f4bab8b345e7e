use std::hash::{DefaultHasher, Hash, Hasher};

use tracing::{debug, trace, warn};

use crate::config::{EffectiveConfig, ENCAP_HEADER_CAPACITY};
use crate::dissect::{FlowKey, FragmentDescriptor};
use crate::frame::CapturedFrame;
use crate::reassembly::session::{ReassemblySession, SlotState};
use crate::reassembly::timeout::{TimeoutQueue, is_expired};

/// Fixed-capacity table of reassembly slots over one statically partitioned
/// byte arena.
///
/// Slot `i` owns arena bytes `[i * slice_size, (i + 1) * slice_size)`; the
/// slice is handed to the slot's session for the duration of a call and
/// never resized. All slots and the arena are allocated up front, so
/// steady-state fragment processing allocates nothing.
///
/// Collisions are absorbed by displacement hashing: every flow has two
/// candidate buckets derived from the halves of its 64-bit hash, and an
/// occupant blocking both may be relocated once to its own alternate bucket.
/// Probe exhaustion is a table-full condition, not an error.
#[derive(Debug)]
pub struct ReassemblyTable {
    config: EffectiveConfig,
    arena: Vec<u8>,
    slots: Vec<ReassemblySession>,
    timeouts: TimeoutQueue,
    /// Sessions expired during `lookup`, finished as timed out and held for
    /// the next sweep to return.
    expired_pending: Vec<usize>,
}

impl ReassemblyTable {
    pub fn new(config: EffectiveConfig) -> Self {
        let slots = (0..config.table_size)
            .map(|_| ReassemblySession::new(config.max_fragment_count))
            .collect();
        Self {
            arena: vec![0u8; config.table_size * config.slice_size],
            slots,
            timeouts: TimeoutQueue::new(),
            expired_pending: Vec::new(),
            config,
        }
    }

    /// Hashes a flow key with a fast, non-cryptographic hasher; collisions
    /// are tolerated by bucket probing, not required to be absent.
    pub fn flow_hash(flow_key: &FlowKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        flow_key.hash(&mut hasher);
        hasher.finish()
    }

    /// Finds the slot bound to `flow_key`, or opens one for it. Returns
    /// `None` when every candidate slot holds a live session for a different
    /// flow even after one displacement round (table full).
    pub fn lookup(&mut self, flow_key: &FlowKey, flow_hash: u64, now_ms: u64) -> Option<usize> {
        let (first, second) = self.buckets(flow_hash);

        for slot in [first, second] {
            if self.slots[slot].is_open() && self.slots[slot].matches(flow_key) {
                return Some(slot);
            }
        }

        for slot in [first, second] {
            if self.reclaimable(slot, now_ms) {
                self.bind(slot, flow_key.clone(), flow_hash, now_ms);
                return Some(slot);
            }
        }

        // Both buckets blocked: try relocating one occupant to its own
        // alternate bucket. One round only; exhaustion is table-full.
        for slot in [first, second] {
            let occupant_hash = self.slots[slot].flow_hash();
            let (occ_first, occ_second) = self.buckets(occupant_hash);
            let alternate = if occ_first == slot { occ_second } else { occ_first };
            if alternate != slot && self.reclaimable(alternate, now_ms) {
                self.relocate(slot, alternate);
                self.bind(slot, flow_key.clone(), flow_hash, now_ms);
                return Some(slot);
            }
        }

        trace!(flow_hash, "no slot available: table full");
        None
    }

    /// Feeds one fragment to the session in `slot`. Returns `false` when the
    /// session rejected it (segment array full or fragment out of bounds).
    pub fn process_fragment(
        &mut self,
        slot: usize,
        frame: &CapturedFrame<'_>,
        descriptor: &FragmentDescriptor,
    ) -> bool {
        let range = self.slot_range(slot);
        let buf = &mut self.arena[range];
        let accepted = self.slots[slot].process_fragment(
            frame.frame_number,
            frame.timestamp_ms,
            frame.bytes,
            descriptor,
            buf,
            &self.config,
        );
        if accepted && self.slots[slot].is_finished() {
            // Completion and expiry must not both consume the session.
            if let Some(handle) = self.slots[slot].take_timeout_handle() {
                self.timeouts.cancel(handle);
            }
        }
        accepted
    }

    /// Drains the timeout queue, finishing every expired session as
    /// timed-out-incomplete. Returns the slots that just finished, plus any
    /// session a `lookup` already expired; the caller consumes their results
    /// and then closes them.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<usize> {
        let mut finished = std::mem::take(&mut self.expired_pending);
        finished.retain(|&slot| self.slots[slot].is_finished());
        for (slot, handle) in self.timeouts.pop_expired(now_ms) {
            // A stale entry can surface when its slot was reused; the
            // session's current registration decides.
            if self.slots[slot].timeout_handle() != Some(handle) {
                continue;
            }
            self.slots[slot].take_timeout_handle();
            let range = self.slot_range(slot);
            self.slots[slot].on_timeout_expired(now_ms, &mut self.arena[range]);
            finished.push(slot);
        }
        finished
    }

    /// Copies the finished datagram out of the slot: the retained
    /// encapsulating headers followed by the payload up to the observed
    /// extent.
    pub fn synthesize(&self, slot: usize) -> Vec<u8> {
        let session = &self.slots[slot];
        let base = slot * self.config.slice_size;
        let encap = &self.arena[base..base + session.encap_len()];
        let payload_base = base + ENCAP_HEADER_CAPACITY;
        let payload = &self.arena[payload_base..payload_base + session.observed_size() as usize];

        let mut datagram = Vec::with_capacity(encap.len() + payload.len());
        datagram.extend_from_slice(encap);
        datagram.extend_from_slice(payload);
        datagram
    }

    /// Closes a finished session and scrubs its buffer slice, so a future
    /// flow in this slot can never observe the prior flow's bytes.
    pub fn close(&mut self, slot: usize) {
        if let Some(handle) = self.slots[slot].take_timeout_handle() {
            self.timeouts.cancel(handle);
        }
        self.slots[slot].close();
        let range = self.slot_range(slot);
        self.arena[range].fill(0);
    }

    pub fn session(&self, slot: usize) -> &ReassemblySession {
        &self.slots[slot]
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn open_sessions(&self) -> usize {
        self.slots.iter().filter(|s| s.is_open()).count()
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let base = slot * self.config.slice_size;
        base..base + self.config.slice_size
    }

    fn buckets(&self, flow_hash: u64) -> (usize, usize) {
        let n = self.slots.len();
        let first = (flow_hash as u32 as usize) % n;
        let mut second = ((flow_hash >> 32) as usize) % n;
        if second == first {
            second = (second + 1) % n;
        }
        (first, second)
    }

    /// A slot that can take a new flow right now. Expired sessions are
    /// normally finished by the sweep; one that expired between sweeps is
    /// finished as timed out here and held for the next sweep, so its
    /// partial result is never dropped. The slot only frees up once that
    /// result has been consumed.
    fn reclaimable(&mut self, slot: usize, now_ms: u64) -> bool {
        match self.slots[slot].state() {
            SlotState::Free => true,
            SlotState::Open => {
                if !is_expired(now_ms, self.slots[slot].expires_at_ms()) {
                    return false;
                }
                warn!(slot, "expiring session missed by the sweep; deferring to the next one");
                if let Some(handle) = self.slots[slot].take_timeout_handle() {
                    self.timeouts.cancel(handle);
                }
                let range = self.slot_range(slot);
                self.slots[slot].on_timeout_expired(now_ms, &mut self.arena[range]);
                self.expired_pending.push(slot);
                false
            }
            // Finished slots still hold results awaiting consumption.
            SlotState::Finished => false,
        }
    }

    fn bind(&mut self, slot: usize, flow_key: FlowKey, flow_hash: u64, now_ms: u64) {
        self.slots[slot].open(flow_key, flow_hash, now_ms, self.config.timeout_ms);
        let handle = self
            .timeouts
            .register(self.slots[slot].expires_at_ms(), slot);
        self.slots[slot].set_timeout_handle(handle);
    }

    /// Moves the session in `from` into the Free slot `to`, arena bytes and
    /// timeout registration included.
    fn relocate(&mut self, from: usize, to: usize) {
        debug!(from, to, "displacing session to its alternate bucket");
        let from_range = self.slot_range(from);
        let to_base = to * self.config.slice_size;
        self.arena.copy_within(from_range.clone(), to_base);
        self.arena[from_range].fill(0);

        self.slots.swap(from, to);
        if let Some(handle) = self.slots[to].take_timeout_handle() {
            self.timeouts.cancel(handle);
            let handle = self.timeouts.register(self.slots[to].expires_at_ms(), to);
            self.slots[to].set_timeout_handle(handle);
        }
    }
}
