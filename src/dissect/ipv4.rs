use std::net::{IpAddr, Ipv4Addr};

use super::{FlowKey, FragmentDescriptor, IpVersion};

/// Extracts fragment geometry from an IPv4 header at `ip_offset`.
///
/// The relevant header fields (RFC 791):
///
///   +---------------------------------------------------------------+
///   | Version (4) | IHL (4) | DSCP (6) | ECN (2)                    |
///   +---------------------------------------------------------------+
///   |                     Total Length (16)                         |
///   +---------------------------------------------------------------+
///   |                   Identification (16)                         |
///   +---------------------------------------------------------------+
///   |Flags (3)|         Fragment Offset (13)                        |
///   +---------------------------------------------------------------+
///
/// Returns `None` for unfragmented packets and for headers too malformed to
/// trust; both take the passthrough path.
pub(crate) fn dissect(frame: &[u8], ip_offset: usize) -> Option<FragmentDescriptor> {
    let header = frame.get(ip_offset..)?;
    if header.len() < 20 {
        return None;
    }

    let first_byte = header[0];
    if first_byte >> 4 != 4 {
        return None;
    }
    let ihl = first_byte & 0x0F;
    if ihl < 5 {
        return None;
    }
    let header_length = (ihl as usize) * 4;
    if header.len() < header_length {
        return None;
    }

    let flags_fragment = u16::from_be_bytes([header[6], header[7]]);
    let more_fragments = flags_fragment & 0x2000 != 0;
    let fragment_offset = u32::from(flags_fragment & 0x1FFF) * 8;
    if !more_fragments && fragment_offset == 0 {
        return None;
    }

    let total_length = u16::from_be_bytes([header[2], header[3]]) as usize;
    if total_length < header_length {
        return None;
    }
    // Payload is what the total-length field claims, bounded by the capture.
    let captured_payload = header.len() - header_length;
    let data_length = (total_length - header_length).min(captured_payload);

    let identification = u16::from_be_bytes([header[4], header[5]]);
    let protocol = header[9];
    let source = Ipv4Addr::new(header[12], header[13], header[14], header[15]);
    let destination = Ipv4Addr::new(header[16], header[17], header[18], header[19]);

    Some(FragmentDescriptor {
        ip_version: IpVersion::V4,
        flow_key: FlowKey {
            src: IpAddr::V4(source),
            dst: IpAddr::V4(destination),
            protocol,
            ident: u32::from(identification),
        },
        fragment_offset,
        data_length: data_length as u32,
        data_offset: (ip_offset + header_length) as u32,
        ip_offset: ip_offset as u32,
        header_length: header_length as u32,
        is_last_fragment: !more_fragments,
        nh_patch_offset: None,
    })
}
