use crate::reassembly::ReassemblyStatus;

/// Borrowed view of one captured link-layer frame plus its capture metadata,
/// as delivered by the external capture collaborator.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    pub frame_number: u64,
    pub timestamp_ms: u64,
    pub capture_length: u32,
    pub wire_length: u32,
    pub bytes: &'a [u8],
}

impl<'a> CapturedFrame<'a> {
    /// Frame whose capture length equals its wire length (nothing truncated).
    pub fn new(frame_number: u64, timestamp_ms: u64, bytes: &'a [u8]) -> Self {
        Self {
            frame_number,
            timestamp_ms,
            capture_length: bytes.len() as u32,
            wire_length: bytes.len() as u32,
            bytes,
        }
    }

    pub fn with_lengths(
        frame_number: u64,
        timestamp_ms: u64,
        capture_length: u32,
        wire_length: u32,
        bytes: &'a [u8],
    ) -> Self {
        Self {
            frame_number,
            timestamp_ms,
            capture_length,
            wire_length,
            bytes,
        }
    }
}

/// Receives the dispatcher's output: either an original frame, optionally
/// annotated with a reassembly status record, or a synthesized datagram.
///
/// Implementations are expected to accept synchronously or buffer
/// internally; the dispatcher never retries a delivery.
pub trait OutputSink {
    fn forward_frame(&mut self, frame: &CapturedFrame<'_>, status: Option<&ReassemblyStatus>);

    fn forward_datagram(&mut self, datagram: &[u8], status: &ReassemblyStatus);
}

/// Link-layer framings the default dissector can skip over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFormat {
    /// Linux Cooked Capture v1 (SLL) - 16 bytes header
    LinuxCookedV1,
    /// Ethernet II - 14 bytes header
    EthernetII,
}

impl LinkFormat {
    /// Detects the link format and returns it with the offset of the network
    /// layer header. Returns `None` for frames too short to classify or with
    /// an EtherType the engine does not handle.
    pub fn detect(frame: &[u8]) -> Option<(LinkFormat, usize)> {
        // Minimum length check - at least need enough bytes to determine format
        if frame.len() < 16 {
            return None;
        }

        // Check for Linux Cooked Capture v1.
        // First 2 bytes are packet type: 0x0000 (unicast to us) or 0x0004 (sent by us)
        if (frame[0] == 0x00 && (frame[1] == 0x00 || frame[1] == 0x04))
            // Link-layer address length is at offset 4-5, typically 0x0006
            && frame[4] == 0x00
            && frame[5] == 0x06
            && is_ip_ethertype(u16::from_be_bytes([frame[14], frame[15]]))
        {
            return Some((LinkFormat::LinuxCookedV1, 16));
        }

        // Check for Ethernet II by the EtherType at offset 12.
        if is_ip_ethertype(u16::from_be_bytes([frame[12], frame[13]])) {
            return Some((LinkFormat::EthernetII, 14));
        }

        None
    }
}

fn is_ip_ethertype(ethertype: u16) -> bool {
    ethertype == 0x0800 || ethertype == 0x86DD
}
