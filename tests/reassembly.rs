//! End-to-end reassembly properties driven through the dispatcher with a
//! recording sink.

use proptest::prelude::*;
use rstest::rstest;

use ipfrag::config::ENCAP_HEADER_CAPACITY;
use ipfrag::{
    CapturedFrame, OutputSink, ReassemblyConfig, ReassemblyDispatcher, ReassemblyStatus,
};

const ETH_IP: usize = 14 + 20;

#[derive(Default)]
struct RecordingSink {
    frames: Vec<(u64, Option<ReassemblyStatus>)>,
    datagrams: Vec<(Vec<u8>, ReassemblyStatus)>,
}

impl OutputSink for RecordingSink {
    fn forward_frame(&mut self, frame: &CapturedFrame<'_>, status: Option<&ReassemblyStatus>) {
        self.frames.push((frame.frame_number, status.cloned()));
    }

    fn forward_datagram(&mut self, datagram: &[u8], status: &ReassemblyStatus) {
        self.datagrams.push((datagram.to_vec(), status.clone()));
    }
}

fn config() -> ReassemblyConfig {
    ReassemblyConfig {
        max_dgram_bytes: 4096,
        buffer_size: 8 * (ENCAP_HEADER_CAPACITY + 4096),
        table_size: 8,
        max_fragment_count: 16,
        timeout_ms: 1_000,
        ..ReassemblyConfig::default()
    }
}

/// Ethernet II frame carrying one IPv4 fragment of flow `ident`.
fn frag_frame(ident: u16, offset: u32, payload: &[u8], last: bool) -> Vec<u8> {
    assert_eq!(offset % 8, 0, "IPv4 fragment offsets are 8-byte aligned");
    let mut bytes = vec![0u8; 12];
    bytes.extend_from_slice(&[0x08, 0x00]);
    let total_length = (20 + payload.len()) as u16;
    let flags_fragment = (offset / 8) as u16 | if last { 0 } else { 0x2000 };
    let mut ip = vec![
        0x45, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 64, 17, 0x00, 0x00, 192, 168, 1, 1, 192,
        168, 1, 2,
    ];
    ip[2..4].copy_from_slice(&total_length.to_be_bytes());
    ip[4..6].copy_from_slice(&ident.to_be_bytes());
    ip[6..8].copy_from_slice(&flags_fragment.to_be_bytes());
    bytes.extend_from_slice(&ip);
    bytes.extend_from_slice(payload);
    bytes
}

fn dispatch_all(
    dispatcher: &mut ReassemblyDispatcher,
    sink: &mut RecordingSink,
    frames: &[Vec<u8>],
) {
    for (i, bytes) in frames.iter().enumerate() {
        dispatcher.dispatch(&CapturedFrame::new(i as u64 + 1, i as u64, bytes), sink);
    }
}

#[test]
fn contiguous_fragments_complete_regardless_of_arrival_order() {
    // Same three fragments, two arrival orders, identical outcome.
    let in_order = [
        frag_frame(1, 0, &[0x11; 48], false),
        frag_frame(1, 48, &[0x22; 48], false),
        frag_frame(1, 96, &[0x33; 48], true),
    ];
    let shuffled = [
        frag_frame(2, 48, &[0x22; 48], false),
        frag_frame(2, 0, &[0x11; 48], false),
        frag_frame(2, 96, &[0x33; 48], true),
    ];

    let mut results = Vec::new();
    for frames in [&in_order, &shuffled] {
        let mut dispatcher =
            ReassemblyDispatcher::new(&config()).expect("config should validate");
        let mut sink = RecordingSink::default();
        dispatch_all(&mut dispatcher, &mut sink, frames);

        assert_eq!(sink.datagrams.len(), 1);
        let (datagram, status) = sink.datagrams.remove(0);
        assert!(status.is_complete);
        assert_eq!(status.hole_bytes, 0);
        assert_eq!(status.reassembled_bytes, 144);
        results.push(datagram[ETH_IP..].to_vec());
    }
    assert_eq!(results[0], results[1], "payload must not depend on arrival order");
}

#[test]
fn hole_accounting_reports_the_gap() {
    // [0,100) and [150,200)-last: 50 hole bytes, incomplete.
    let mut dispatcher = ReassemblyDispatcher::new(&config()).expect("config should validate");
    let mut sink = RecordingSink::default();
    // Fragment offsets are 8-aligned, so the gap runs [100, 152).
    let frames = [
        frag_frame(3, 0, &[1; 100], false),
        frag_frame(3, 152, &[2; 48], true),
    ];
    dispatch_all(&mut dispatcher, &mut sink, &frames);

    let status = sink.frames[1].1.as_ref().expect("status attached to fragment");
    assert!(!status.is_complete);
    assert_eq!(status.hole_bytes, 52);
    assert!(sink.datagrams.is_empty(), "incomplete datagrams are not emitted by default");
}

#[test]
fn overlap_is_counted_and_last_write_wins() {
    // [0,104) then [48,152)-last: 56 overlapping bytes rewritten by the
    // later fragment.
    let mut dispatcher = ReassemblyDispatcher::new(&config()).expect("config should validate");
    let mut sink = RecordingSink::default();
    let frames = [
        frag_frame(4, 0, &[0xAA; 104], false),
        frag_frame(4, 48, &[0xBB; 104], true),
    ];
    dispatch_all(&mut dispatcher, &mut sink, &frames);

    assert_eq!(sink.datagrams.len(), 1);
    let (datagram, status) = &sink.datagrams[0];
    assert_eq!(status.overlap_bytes, 56);
    assert!(status.is_complete);
    let payload = &datagram[ETH_IP..];
    assert_eq!(&payload[..48], &[0xAAu8; 48]);
    assert_eq!(&payload[48..152], &[0xBBu8; 104]);
}

#[test]
fn out_of_order_first_fragment_matches_in_order_result() {
    let orders: [[usize; 3]; 2] = [[1, 0, 2], [0, 1, 2]];
    let pieces = [
        (0u32, vec![0x10u8; 48], false),
        (48, vec![0x20; 48], false),
        (96, vec![0x30; 48], true),
    ];

    // Distinct idents per run, so only the payloads are comparable.
    let mut payloads = Vec::new();
    for (ident, order) in orders.iter().enumerate() {
        let frames: Vec<Vec<u8>> = order
            .iter()
            .map(|&i| {
                let (offset, payload, last) = &pieces[i];
                frag_frame(10 + ident as u16, *offset, payload, *last)
            })
            .collect();
        let mut dispatcher =
            ReassemblyDispatcher::new(&config()).expect("config should validate");
        let mut sink = RecordingSink::default();
        dispatch_all(&mut dispatcher, &mut sink, &frames);
        assert_eq!(sink.datagrams.len(), 1);
        let (datagram, status) = sink.datagrams.remove(0);
        assert!(status.is_complete);
        payloads.push(datagram[ETH_IP..].to_vec());
    }
    assert_eq!(payloads[0], payloads[1]);
}

#[test]
fn timeout_on_last_finishes_without_waiting() {
    let cfg = ReassemblyConfig {
        timeout_on_last_fragment: true,
        emit_incomplete_datagrams: true,
        timeout_ms: 3_600_000, // the clock alone would never fire in this test
        ..config()
    };
    let mut dispatcher = ReassemblyDispatcher::new(&cfg).expect("config should validate");
    let mut sink = RecordingSink::default();
    let frames = [
        frag_frame(5, 0, &[1; 48], false),
        frag_frame(5, 96, &[2; 48], true),
    ];
    dispatch_all(&mut dispatcher, &mut sink, &frames);

    assert_eq!(sink.datagrams.len(), 1, "finishes the moment the last fragment lands");
    let (_, status) = &sink.datagrams[0];
    assert!(status.is_timed_out);
    assert!(!status.is_complete);
    assert_eq!(status.hole_bytes, 48);
    assert_eq!(dispatcher.stats().datagrams_timed_out, 1);
}

#[test]
fn slot_reuse_leaks_no_bytes_between_flows() {
    let cfg = ReassemblyConfig {
        table_size: 1,
        buffer_size: ENCAP_HEADER_CAPACITY + 4096,
        ..config()
    };
    let mut dispatcher = ReassemblyDispatcher::new(&cfg).expect("config should validate");
    let mut sink = RecordingSink::default();

    // First flow fills 256 bytes with 0xFF and completes.
    let frames = [
        frag_frame(6, 0, &[0xFF; 128], false),
        frag_frame(6, 128, &[0xFF; 128], true),
    ];
    dispatch_all(&mut dispatcher, &mut sink, &frames);
    assert_eq!(sink.datagrams.len(), 1);
    sink.datagrams.clear();

    // Second flow writes a shorter datagram into the same slot.
    let frames = [
        frag_frame(7, 0, &[0x01; 64], false),
        frag_frame(7, 64, &[0x02; 64], true),
    ];
    for (i, bytes) in frames.iter().enumerate() {
        dispatcher.dispatch(&CapturedFrame::new(10 + i as u64, 10, bytes), &mut sink);
    }

    assert_eq!(sink.datagrams.len(), 1);
    let (datagram, _) = &sink.datagrams[0];
    assert_eq!(datagram.len(), ETH_IP + 128);
    assert!(
        !datagram.contains(&0xFF),
        "prior flow's bytes must not be observable"
    );
}

#[test]
fn saturated_table_rejects_without_corrupting_live_sessions() {
    let cfg = ReassemblyConfig {
        table_size: 2,
        buffer_size: 2 * (ENCAP_HEADER_CAPACITY + 4096),
        ..config()
    };
    let mut dispatcher = ReassemblyDispatcher::new(&cfg).expect("config should validate");
    let mut sink = RecordingSink::default();

    // Open live sessions on distinct flows until the table is saturated,
    // then push more distinct flows at it.
    for ident in 0..12u16 {
        let frame = frag_frame(100 + ident, 0, &[ident as u8; 32], false);
        dispatcher.dispatch(&CapturedFrame::new(u64::from(ident), 0, &frame), &mut sink);
    }
    assert_eq!(dispatcher.table().open_sessions(), 2);
    assert!(dispatcher.stats().table_full_failures > 0);

    // Send the closing fragment for every flow. Only the two that actually
    // held slots can complete; rejected flows contribute nothing.
    for ident in 0..12u16 {
        let frame = frag_frame(100 + ident, 32, &[ident as u8; 32], true);
        dispatcher.dispatch(&CapturedFrame::new(50 + u64::from(ident), 1, &frame), &mut sink);
    }
    assert_eq!(sink.datagrams.len(), 2, "both live sessions completed intact");
    for (datagram, status) in &sink.datagrams {
        assert!(status.is_complete);
        assert_eq!(status.hole_bytes, 0);
        assert_eq!(datagram.len(), ETH_IP + 64);
    }
}

#[rstest]
#[case(true, true, 1, 2)] // passthrough + emission: fragments and datagram
#[case(true, false, 0, 2)] // passthrough only
#[case(false, true, 1, 0)] // emission only
#[case(false, false, 0, 0)] // tracking only: no output at all
fn output_policy_matrix(
    #[case] passthrough: bool,
    #[case] emit: bool,
    #[case] expected_datagrams: usize,
    #[case] expected_frames: usize,
) {
    let cfg = ReassemblyConfig {
        passthrough_fragments: passthrough,
        emit_complete_datagrams: emit,
        ..config()
    };
    let mut dispatcher = ReassemblyDispatcher::new(&cfg).expect("config should validate");
    let mut sink = RecordingSink::default();
    let frames = [
        frag_frame(8, 0, &[1; 48], false),
        frag_frame(8, 48, &[2; 48], true),
    ];
    dispatch_all(&mut dispatcher, &mut sink, &frames);

    assert_eq!(sink.datagrams.len(), expected_datagrams);
    assert_eq!(sink.frames.len(), expected_frames);
    assert_eq!(dispatcher.stats().datagrams_completed, 1);
}

proptest! {
    /// Any permutation of contiguous fragments covering [0, n*64) with the
    /// last-fragment marker completes with zero holes and the exact payload.
    #[test]
    fn completes_under_any_arrival_order(order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()) {
        let count = order.len();
        let frames: Vec<Vec<u8>> = order
            .iter()
            .map(|&i| {
                let payload = vec![i as u8 + 1; 64];
                frag_frame(9, (i * 64) as u32, &payload, i == count - 1)
            })
            .collect();

        let mut dispatcher =
            ReassemblyDispatcher::new(&config()).expect("config should validate");
        let mut sink = RecordingSink::default();
        dispatch_all(&mut dispatcher, &mut sink, &frames);

        prop_assert_eq!(sink.datagrams.len(), 1);
        let (datagram, status) = &sink.datagrams[0];
        prop_assert!(status.is_complete);
        prop_assert_eq!(status.hole_bytes, 0);
        prop_assert_eq!(status.reassembled_bytes, (count * 64) as u32);
        let payload = &datagram[ETH_IP..];
        for i in 0..count {
            let expected = vec![i as u8 + 1; 64];
            prop_assert_eq!(&payload[i * 64..(i + 1) * 64], expected.as_slice());
        }
    }
}
