use tracing::{debug, trace};

use crate::config::{EffectiveConfig, ENCAP_HEADER_CAPACITY};
use crate::dissect::{FlowKey, FragmentDescriptor, IpVersion};
use crate::reassembly::segment::{Coverage, Segment, SegmentTracker};
use crate::reassembly::status::{ReassemblyStatus, SegmentRecord, StatusKind};
use crate::reassembly::timeout::TimeoutHandle;

/// Lifecycle of a table slot. Transitions run strictly
/// Free → Open (`open`) → Finished (completion or timeout) → Free (`close`);
/// sticky per-slot caches and implicit emptiness flags are deliberately
/// avoided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Open,
    Finished,
}

/// Reassembly state machine for a single flow.
///
/// The session owns no bytes: the table passes in the slot's arena slice,
/// laid out as `[ENCAP_HEADER_CAPACITY header region | payload region]`.
/// Fragment payloads land at their datagram offset in the payload region;
/// the encapsulating link/IP headers of the first fragment land in the
/// header region with their fragmentation bits cleared, so the synthesized
/// datagram reads as a single unfragmented packet.
#[derive(Debug)]
pub struct ReassemblySession {
    state: SlotState,
    flow_key: Option<FlowKey>,
    flow_hash: u64,
    segments: Vec<Segment>,

    has_first: bool,
    has_last: bool,
    is_complete: bool,
    is_timed_out: bool,
    payload_copied: bool,

    coverage: Coverage,
    reassembled_bytes: u32,

    encap_len: usize,
    ip_version: Option<IpVersion>,
    ip_offset: usize,
    header_length: u32,

    opened_at_ms: u64,
    expires_at_ms: u64,
    latency_ms: u64,
    timeout_handle: Option<TimeoutHandle>,
}

impl ReassemblySession {
    pub fn new(max_fragment_count: usize) -> Self {
        Self {
            state: SlotState::Free,
            flow_key: None,
            flow_hash: 0,
            segments: Vec::with_capacity(max_fragment_count),
            has_first: false,
            has_last: false,
            is_complete: false,
            is_timed_out: false,
            payload_copied: false,
            coverage: Coverage::default(),
            reassembled_bytes: 0,
            encap_len: 0,
            ip_version: None,
            ip_offset: 0,
            header_length: 0,
            opened_at_ms: 0,
            expires_at_ms: 0,
            latency_ms: 0,
            timeout_handle: None,
        }
    }

    /// Binds the session to a flow and arms its deadline.
    ///
    /// Precondition: the session is Free. The caller registers the deadline
    /// with the timeout queue and hands the handle back via
    /// [`set_timeout_handle`](Self::set_timeout_handle).
    pub fn open(&mut self, flow_key: FlowKey, flow_hash: u64, now_ms: u64, timeout_ms: u64) {
        debug_assert_eq!(self.state, SlotState::Free, "open() on a non-Free session");
        self.reset();
        self.state = SlotState::Open;
        self.flow_key = Some(flow_key);
        self.flow_hash = flow_hash;
        self.opened_at_ms = now_ms;
        self.expires_at_ms = now_ms.saturating_add(timeout_ms);
        trace!(flow_hash, expires_at_ms = self.expires_at_ms, "session opened");
    }

    /// Places one fragment. Returns `false` without any state change when the
    /// segment array is full or the fragment falls outside the payload
    /// region; the datagram then finishes incomplete, with holes, on its own
    /// schedule. This is backpressure, not an error.
    pub fn process_fragment(
        &mut self,
        frame_number: u64,
        now_ms: u64,
        frame: &[u8],
        descriptor: &FragmentDescriptor,
        buf: &mut [u8],
        config: &EffectiveConfig,
    ) -> bool {
        debug_assert_eq!(self.state, SlotState::Open, "fragment into a non-Open session");

        if self.segments.len() >= config.max_fragment_count {
            return false;
        }
        let end = u64::from(descriptor.fragment_offset) + u64::from(descriptor.data_length);
        if end > u64::from(config.max_dgram_bytes) {
            return false;
        }

        // The first observed fragment contributes headers even when it is
        // not the offset-0 fragment, so a packet can still be synthesized
        // for an incomplete datagram. The offset-0 fragment overwrites the
        // provisional copy when it shows up.
        if self.segments.is_empty() || descriptor.fragment_offset == 0 {
            self.capture_encap_headers(frame, descriptor, buf);
        }
        if descriptor.fragment_offset == 0 {
            self.has_first = true;
        }
        if descriptor.is_last_fragment {
            self.has_last = true;
        }

        self.segments.push(Segment {
            offset: descriptor.fragment_offset,
            length: descriptor.data_length,
            frame_number,
            arrival_ms: now_ms,
            overlap_bytes: 0,
        });
        // Stable sort: equal offsets keep arrival order.
        self.segments.sort_by_key(|s| s.offset);
        self.coverage = SegmentTracker::account(&mut self.segments);

        if config.copy_payload {
            self.copy_payload(frame, descriptor, buf);
        }

        if self.has_last && self.coverage.hole_bytes == 0 {
            self.finish(now_ms, buf, false);
        } else if descriptor.is_last_fragment && config.timeout_on_last_fragment {
            // The datagram can never complete in time once its last fragment
            // is in and holes remain; give up now instead of holding the slot.
            self.finish(now_ms, buf, true);
        }

        true
    }

    /// Timeout-queue callback: the deadline passed before completion.
    pub fn on_timeout_expired(&mut self, now_ms: u64, buf: &mut [u8]) {
        debug_assert_eq!(self.state, SlotState::Open, "timeout on a non-Open session");
        self.finish(now_ms, buf, true);
    }

    /// Releases the slot for reuse.
    ///
    /// Precondition: called exactly once per `open()`; closing an
    /// already-Free session is a dispatcher logic bug and is surfaced by a
    /// debug assertion rather than ignored.
    pub fn close(&mut self) {
        debug_assert_ne!(self.state, SlotState::Free, "close() on a Free session");
        self.reset();
    }

    fn reset(&mut self) {
        self.state = SlotState::Free;
        self.flow_key = None;
        self.flow_hash = 0;
        self.segments.clear();
        self.has_first = false;
        self.has_last = false;
        self.is_complete = false;
        self.is_timed_out = false;
        self.payload_copied = false;
        self.coverage = Coverage::default();
        self.reassembled_bytes = 0;
        self.encap_len = 0;
        self.ip_version = None;
        self.ip_offset = 0;
        self.header_length = 0;
        self.opened_at_ms = 0;
        self.expires_at_ms = 0;
        self.latency_ms = 0;
        self.timeout_handle = None;
    }

    fn finish(&mut self, now_ms: u64, buf: &mut [u8], timed_out: bool) {
        self.is_complete = !timed_out;
        self.is_timed_out = timed_out;
        self.latency_ms = now_ms.saturating_sub(self.opened_at_ms);
        self.reassembled_bytes = (u64::from(self.coverage.observed_size)
            .saturating_sub(self.coverage.hole_bytes)) as u32;
        self.finalize_headers(buf);
        // Unbind the key: the flow may start a fresh datagram in another
        // slot while this buffer is still being read out.
        self.flow_key = None;
        self.state = SlotState::Finished;
        if timed_out {
            debug!(
                flow_hash = self.flow_hash,
                hole_bytes = self.coverage.hole_bytes,
                segments = self.segments.len(),
                "session timed out incomplete"
            );
        } else {
            trace!(
                flow_hash = self.flow_hash,
                bytes = self.reassembled_bytes,
                latency_ms = self.latency_ms,
                "datagram complete"
            );
        }
    }

    /// Copies the frame's link and IP headers into the header region and
    /// clears the fragmentation machinery: IPv4 zeroes the flags/offset
    /// field; IPv6 splices out the Fragment extension header by copying only
    /// the bytes before it and patching the preceding Next Header octet.
    fn capture_encap_headers(&mut self, frame: &[u8], descriptor: &FragmentDescriptor, buf: &mut [u8]) {
        let retained = match descriptor.ip_version {
            IpVersion::V4 => descriptor.data_offset as usize,
            IpVersion::V6 => (descriptor.data_offset as usize).saturating_sub(8),
        };
        if retained > ENCAP_HEADER_CAPACITY || retained > frame.len() || retained > buf.len() {
            debug!(retained, "encapsulating headers exceed the header region; skipping capture");
            return;
        }
        buf[..retained].copy_from_slice(&frame[..retained]);
        self.encap_len = retained;
        self.ip_version = Some(descriptor.ip_version);
        self.ip_offset = descriptor.ip_offset as usize;
        self.header_length = descriptor.header_length;

        match descriptor.ip_version {
            IpVersion::V4 => {
                if let Some(field) = buf.get_mut(self.ip_offset + 6..self.ip_offset + 8) {
                    field.fill(0);
                }
            }
            IpVersion::V6 => {
                if let Some(patch) = descriptor.nh_patch_offset
                    && let Some(octet) = buf.get_mut(patch as usize)
                {
                    *octet = descriptor.flow_key.protocol;
                }
            }
        }
    }

    fn copy_payload(&mut self, frame: &[u8], descriptor: &FragmentDescriptor, buf: &mut [u8]) {
        let offset = descriptor.fragment_offset as usize;
        let length = descriptor.data_length as usize;
        let src_start = descriptor.data_offset as usize;

        let Some(src) = frame.get(src_start..src_start + length) else {
            return;
        };
        let dst_start = ENCAP_HEADER_CAPACITY + offset;
        let Some(dst) = buf.get_mut(dst_start..dst_start + length) else {
            return;
        };
        // Overlapping fragments overwrite at the byte level: last write wins.
        dst.copy_from_slice(src);
        self.payload_copied = true;
    }

    /// Rewrites the synthesized header's length fields to the reassembled
    /// extent. The first fragment's header carried only its own length; left
    /// alone it would fail downstream sanity checks. The IPv4 checksum is
    /// zeroed since it no longer matches the rewritten header.
    fn finalize_headers(&mut self, buf: &mut [u8]) {
        if self.encap_len == 0 {
            return;
        }
        let ip = self.ip_offset;
        let observed = self.coverage.observed_size;
        match self.ip_version {
            Some(IpVersion::V4) => {
                let total = u64::from(self.header_length) + u64::from(observed);
                let total = total.min(u64::from(u16::MAX)) as u16;
                if let Some(field) = buf.get_mut(ip + 2..ip + 4) {
                    field.copy_from_slice(&total.to_be_bytes());
                }
                if let Some(field) = buf.get_mut(ip + 10..ip + 12) {
                    field.fill(0);
                }
            }
            Some(IpVersion::V6) => {
                let ext_len = self.header_length.saturating_sub(40);
                let payload = u64::from(ext_len) + u64::from(observed);
                let payload = payload.min(u64::from(u16::MAX)) as u16;
                if let Some(field) = buf.get_mut(ip + 4..ip + 6) {
                    field.copy_from_slice(&payload.to_be_bytes());
                }
            }
            None => {}
        }
    }

    /// Builds the status record attached to output. `kind` distinguishes
    /// tracking-only annotations from full-reassembly results.
    pub fn status_record(&self, kind: StatusKind) -> ReassemblyStatus {
        let ip_version = self.ip_version.unwrap_or(IpVersion::V4);
        ReassemblyStatus {
            kind,
            ip_version,
            is_reassembled: self.payload_copied,
            is_complete: self.is_complete,
            is_timed_out: self.is_timed_out,
            hole_bytes: self.coverage.hole_bytes,
            overlap_bytes: self.coverage.overlap_bytes,
            reassembled_bytes: self.reassembled_bytes,
            latency_ms: self.latency_ms,
            segments: self
                .segments
                .iter()
                .map(|s| SegmentRecord {
                    frame_number: s.frame_number,
                    offset: s.offset,
                    length: s.length,
                    overlap_bytes: s.overlap_bytes,
                })
                .collect(),
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SlotState::Open
    }

    pub fn is_finished(&self) -> bool {
        self.state == SlotState::Finished
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn is_timed_out(&self) -> bool {
        self.is_timed_out
    }

    pub fn matches(&self, flow_key: &FlowKey) -> bool {
        self.flow_key.as_ref() == Some(flow_key)
    }

    pub fn flow_hash(&self) -> u64 {
        self.flow_hash
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn observed_size(&self) -> u32 {
        self.coverage.observed_size
    }

    pub fn hole_bytes(&self) -> u64 {
        self.coverage.hole_bytes
    }

    pub fn overlap_bytes(&self) -> u64 {
        self.coverage.overlap_bytes
    }

    pub fn reassembled_bytes(&self) -> u32 {
        self.reassembled_bytes
    }

    pub fn encap_len(&self) -> usize {
        self.encap_len
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn set_timeout_handle(&mut self, handle: TimeoutHandle) {
        self.timeout_handle = Some(handle);
    }

    pub fn take_timeout_handle(&mut self) -> Option<TimeoutHandle> {
        self.timeout_handle.take()
    }

    pub fn timeout_handle(&self) -> Option<TimeoutHandle> {
        self.timeout_handle
    }
}
