pub mod ipv4;
pub mod ipv6;

use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use crate::frame::{CapturedFrame, LinkFormat};

/// IP version of a fragment's datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Identity of the datagram a fragment belongs to. Two fragments with equal
/// keys are pieces of the same original datagram.
#[derive(Debug, Clone, Eq)]
pub struct FlowKey {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    /// Fragment identification field; IPv4's 16-bit value widens to u32.
    pub ident: u32,
}

impl PartialEq for FlowKey {
    fn eq(&self, other: &Self) -> bool {
        self.src == other.src
            && self.dst == other.dst
            && self.protocol == other.protocol
            && self.ident == other.ident
    }
}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.src.hash(state);
        self.dst.hash(state);
        self.protocol.hash(state);
        self.ident.hash(state);
    }
}

/// Read-only geometry of one IP fragment within its captured frame, produced
/// fresh for every frame the dissector classifies as a fragment.
///
/// All offsets are frame-relative byte positions. `header_length` counts the
/// IP header bytes retained in the synthesized datagram; for IPv6 this
/// excludes the 8-byte Fragment extension header, which is spliced out
/// during header reassembly.
#[derive(Debug, Clone)]
pub struct FragmentDescriptor {
    pub ip_version: IpVersion,
    pub flow_key: FlowKey,
    /// Byte offset of this fragment's payload within the final datagram.
    pub fragment_offset: u32,
    /// Payload bytes carried by this fragment (bounded by the capture).
    pub data_length: u32,
    /// Offset into the frame where the payload begins.
    pub data_offset: u32,
    /// Offset into the frame where the network header begins.
    pub ip_offset: u32,
    /// Retained IP header bytes, options/extension headers included.
    pub header_length: u32,
    pub is_last_fragment: bool,
    /// IPv6 only: frame offset of the Next Header octet that must be patched
    /// when the Fragment extension header is removed.
    pub nh_patch_offset: Option<u32>,
}

/// Classifies captured frames as IP fragments.
///
/// Returning `None` means "not a fragment": unfragmented traffic, unknown
/// link framing and malformed headers all take the plain passthrough path.
pub trait Dissector {
    fn dissect(&self, frame: &CapturedFrame<'_>) -> Option<FragmentDescriptor>;
}

/// Default dissector: detects the link framing, then reads the IPv4 header
/// or walks the IPv6 extension chain to find a Fragment header.
#[derive(Debug, Default)]
pub struct IpDissector {
    /// Fixed network-layer offset for link types `LinkFormat` cannot detect
    /// (raw IP captures, tunnel taps). `None` means autodetect.
    pub network_offset: Option<usize>,
}

impl IpDissector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network_offset(network_offset: usize) -> Self {
        Self {
            network_offset: Some(network_offset),
        }
    }
}

impl Dissector for IpDissector {
    fn dissect(&self, frame: &CapturedFrame<'_>) -> Option<FragmentDescriptor> {
        let ip_offset = match self.network_offset {
            Some(offset) => offset,
            None => LinkFormat::detect(frame.bytes)?.1,
        };

        let version = frame.bytes.get(ip_offset)? >> 4;
        match version {
            4 => ipv4::dissect(frame.bytes, ip_offset),
            6 => ipv6::dissect(frame.bytes, ip_offset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::{Dissector, FlowKey, IpDissector, IpVersion};
    use crate::frame::CapturedFrame;

    #[test]
    fn flow_keys_compare_by_all_fields() {
        let base = FlowKey {
            src: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            protocol: 17,
            ident: 0x1234,
        };
        let same = base.clone();
        let other_ident = FlowKey {
            ident: 0x1235,
            ..base.clone()
        };
        assert_eq!(base, same);
        assert_ne!(base, other_ident);
    }

    #[test]
    fn dissects_ipv4_fragment_behind_ethernet() {
        let mut bytes = vec![0u8; 14];
        bytes[12] = 0x08; // EtherType IPv4
        bytes.extend_from_slice(&[
            0x45, 0x00, 0x00, 0x1c, // total length 28
            0xab, 0xcd, // identification
            0x20, 0x00, // more-fragments, offset 0
            64, 17, 0x00, 0x00, // ttl, udp, checksum
            10, 0, 0, 1, 10, 0, 0, 2,
        ]);
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let frame = CapturedFrame::new(1, 0, &bytes);
        let descriptor = IpDissector::new()
            .dissect(&frame)
            .expect("fragment should dissect");
        assert_eq!(descriptor.ip_version, IpVersion::V4);
        assert_eq!(descriptor.ip_offset, 14);
        assert_eq!(descriptor.data_offset, 34);
        assert_eq!(descriptor.data_length, 8);
        assert!(!descriptor.is_last_fragment);
    }

    #[test]
    fn fixed_offset_overrides_link_detection() {
        // Raw IP capture: no link header at all.
        let bytes = [
            0x45, 0x00, 0x00, 0x1c, 0xab, 0xcd, 0x20, 0x00, 64, 17, 0x00, 0x00, 10, 0, 0, 1, 10,
            0, 0, 2, 1, 2, 3, 4, 5, 6, 7, 8,
        ];
        let frame = CapturedFrame::new(1, 0, &bytes);
        let descriptor = IpDissector::with_network_offset(0)
            .dissect(&frame)
            .expect("raw fragment should dissect");
        assert_eq!(descriptor.ip_offset, 0);
        assert_eq!(descriptor.data_offset, 20);
    }

    #[test]
    fn unfragmented_frame_is_not_a_fragment() {
        let mut bytes = vec![0u8; 14];
        bytes[12] = 0x08;
        bytes.extend_from_slice(&[
            0x45, 0x00, 0x00, 0x14, 0xab, 0xcd, 0x40, 0x00, // don't-fragment
            64, 6, 0x00, 0x00, 10, 0, 0, 1, 10, 0, 0, 2,
        ]);
        let frame = CapturedFrame::new(1, 0, &bytes);
        assert!(IpDissector::new().dissect(&frame).is_none());
    }
}
