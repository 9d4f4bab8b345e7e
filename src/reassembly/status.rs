use crate::dissect::IpVersion;

/// Per-fragment entry inside a [`ReassemblyStatus`], capped at the
/// configured max fragment count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    pub frame_number: u64,
    pub offset: u32,
    pub length: u32,
    pub overlap_bytes: u16,
}

/// Which engine mode produced a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Fragment geometry was tracked; no datagram was synthesized.
    Tracking,
    /// Payload bytes were placed into a reassembly buffer.
    Reassembled,
}

/// Reassembly outcome attached to passthrough fragments and synthesized
/// datagrams. This is the engine's entire externally visible result surface;
/// downstream analysis reads holes, overlaps and timing from here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblyStatus {
    pub kind: StatusKind,
    pub ip_version: IpVersion,
    pub is_reassembled: bool,
    pub is_complete: bool,
    pub is_timed_out: bool,
    pub hole_bytes: u64,
    pub overlap_bytes: u64,
    pub reassembled_bytes: u32,
    /// Milliseconds from session open to finish; zero while in flight.
    pub latency_ms: u64,
    pub segments: Vec<SegmentRecord>,
}
