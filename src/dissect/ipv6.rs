use std::net::{IpAddr, Ipv6Addr};

use super::{FlowKey, FragmentDescriptor, IpVersion};

const NEXT_HEADER_HOP_BY_HOP: u8 = 0;
const NEXT_HEADER_ROUTING: u8 = 43;
const NEXT_HEADER_FRAGMENT: u8 = 44;
const NEXT_HEADER_DEST_OPTS: u8 = 60;

/// Extension headers walked at most this many times before the packet is
/// declared not-a-fragment. Real chains are one or two headers deep.
const MAX_EXTENSION_HEADERS: usize = 8;

/// Extracts fragment geometry from an IPv6 packet at `ip_offset` by walking
/// the extension-header chain until a Fragment header (RFC 8200 §4.5) is
/// found:
///
///   +---------------------------------------------------------------+
///   | Next Header (8) | Reserved (8) | Fragment Offset (13) |Res|M  |
///   +---------------------------------------------------------------+
///   |                       Identification (32)                     |
///   +---------------------------------------------------------------+
///
/// The descriptor records where the Fragment header sits so header
/// reassembly can splice it out: `header_length` counts only the retained
/// header bytes before it, and `nh_patch_offset` points at the Next Header
/// octet that must be rewritten with the Fragment header's own Next Header
/// value.
pub(crate) fn dissect(frame: &[u8], ip_offset: usize) -> Option<FragmentDescriptor> {
    let packet = frame.get(ip_offset..)?;
    if packet.len() < 40 {
        return None;
    }
    if packet[0] >> 4 != 6 {
        return None;
    }

    let payload_length = u16::from_be_bytes([packet[4], packet[5]]) as usize;
    let source = Ipv6Addr::from(<[u8; 16]>::try_from(&packet[8..24]).ok()?);
    let destination = Ipv6Addr::from(<[u8; 16]>::try_from(&packet[24..40]).ok()?);

    // Walk the chain. `nh_patch_offset` trails one header behind the cursor:
    // it is always the position of the octet that names the header at `pos`.
    let mut next_header = packet[6];
    let mut nh_patch_offset = ip_offset + 6;
    let mut pos = ip_offset + 40;

    for _ in 0..MAX_EXTENSION_HEADERS {
        match next_header {
            NEXT_HEADER_FRAGMENT => {
                let fragment = frame.get(pos..pos + 8)?;
                let offset_flags = u16::from_be_bytes([fragment[2], fragment[3]]);
                let fragment_offset = u32::from(offset_flags >> 3) * 8;
                let more_fragments = offset_flags & 0x1 != 0;
                let identification =
                    u32::from_be_bytes([fragment[4], fragment[5], fragment[6], fragment[7]]);

                let data_offset = pos + 8;
                // Payload-length field covers everything after the fixed
                // header; subtract the extension headers consumed so far.
                // Zero-length fragments are wire-legal and still carry the
                // last-fragment flag, so they are dissected like any other.
                let claimed = payload_length.saturating_sub(data_offset - (ip_offset + 40));
                let data_length = claimed.min(frame.len().saturating_sub(data_offset));

                return Some(FragmentDescriptor {
                    ip_version: IpVersion::V6,
                    flow_key: FlowKey {
                        src: IpAddr::V6(source),
                        dst: IpAddr::V6(destination),
                        protocol: fragment[0],
                        ident: identification,
                    },
                    fragment_offset,
                    data_length: data_length as u32,
                    data_offset: data_offset as u32,
                    ip_offset: ip_offset as u32,
                    header_length: (pos - ip_offset) as u32,
                    is_last_fragment: !more_fragments,
                    nh_patch_offset: Some(nh_patch_offset as u32),
                });
            }
            NEXT_HEADER_HOP_BY_HOP | NEXT_HEADER_ROUTING | NEXT_HEADER_DEST_OPTS => {
                let ext = frame.get(pos..pos + 2)?;
                next_header = ext[0];
                nh_patch_offset = pos;
                pos += (ext[1] as usize + 1) * 8;
            }
            // Upper-layer protocol reached without a Fragment header.
            _ => return None,
        }
    }

    None
}
