/// One fragment's byte range as placed in a session, sorted by `offset`.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Byte offset of the fragment's payload within the datagram.
    pub offset: u32,
    /// Payload bytes the fragment carried.
    pub length: u32,
    /// Capture frame the fragment arrived in.
    pub frame_number: u64,
    pub arrival_ms: u64,
    /// Bytes of this segment already covered by earlier-sorted segments,
    /// filled in by [`SegmentTracker::account`].
    pub overlap_bytes: u16,
}

/// Aggregate byte accounting over a session's segment list.
///
/// `observed_size` is the highest `offset + length` seen; the distinct bytes
/// covered reconcile as `observed_size - hole_bytes`, and the sum of segment
/// lengths as covered bytes plus `overlap_bytes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coverage {
    pub hole_bytes: u64,
    pub overlap_bytes: u64,
    pub observed_size: u32,
}

/// Computes hole and overlap byte counts over a sorted segment list.
pub struct SegmentTracker;

impl SegmentTracker {
    /// Single sweep with a coverage high-water mark over segments already
    /// sorted by offset (stable sort, so equal offsets keep arrival order
    /// and the first-arrived fragment wins for header purposes).
    ///
    /// A gap before the first segment counts as a hole: once any fragment
    /// has arrived, everything below the lowest offset is known-missing.
    /// Bytes beyond the last segment are not holes; the datagram's full
    /// extent is unknown until the last fragment arrives.
    pub fn account(segments: &mut [Segment]) -> Coverage {
        let mut coverage = Coverage::default();
        let mut mark = 0u32;

        for segment in segments {
            if segment.offset > mark {
                coverage.hole_bytes += u64::from(segment.offset - mark);
            }
            let overlap = if segment.offset < mark {
                (mark - segment.offset).min(segment.length)
            } else {
                0
            };
            segment.overlap_bytes = overlap.min(u32::from(u16::MAX)) as u16;
            coverage.overlap_bytes += u64::from(overlap);

            mark = mark.max(segment.offset.saturating_add(segment.length));
        }

        coverage.observed_size = mark;
        coverage
    }
}
