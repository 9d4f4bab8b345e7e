use tracing::trace;

use crate::config::{EffectiveConfig, ReassemblyConfig};
use crate::dissect::{Dissector, IpDissector};
use crate::error::ConfigError;
use crate::frame::{CapturedFrame, OutputSink};
use crate::reassembly::status::StatusKind;
use crate::reassembly::table::ReassemblyTable;

/// Accumulated counters; the engine's only observable error signal. A
/// rejected fragment is permanently lost to reassembly (though still
/// delivered when passthrough is enabled), so there is nothing to retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub frames_seen: u64,
    pub fragments_seen: u64,
    pub passthrough_frames: u64,
    pub datagrams_completed: u64,
    pub datagrams_timed_out: u64,
    pub datagrams_emitted: u64,
    pub table_full_failures: u64,
    pub session_full_failures: u64,
}

/// Orchestrates the whole pipeline per captured frame: classify, look up or
/// open a session, feed it the fragment, apply the output policy, emit.
///
/// Processing is single-threaded: one `dispatch` call runs to completion
/// before the next frame is accepted. The timeout queue is swept
/// opportunistically at the top of every call; callers that must reclaim
/// flows which never see another frame can also drive [`sweep`](Self::sweep)
/// from a timer.
///
/// No failure in this path escalates to the caller: every degraded case
/// becomes "pass the frame through unreassembled" plus a counter.
#[derive(Debug)]
pub struct ReassemblyDispatcher<D = IpDissector> {
    config: EffectiveConfig,
    table: ReassemblyTable,
    dissector: D,
    /// Finished sessions awaiting emission; drained before `dispatch`
    /// returns, so it never carries slots across frames.
    ready: Vec<usize>,
    stats: ReassemblyStats,
}

impl ReassemblyDispatcher<IpDissector> {
    pub fn new(config: &ReassemblyConfig) -> Result<Self, ConfigError> {
        Self::with_dissector(config, IpDissector::new())
    }
}

impl<D: Dissector> ReassemblyDispatcher<D> {
    pub fn with_dissector(config: &ReassemblyConfig, dissector: D) -> Result<Self, ConfigError> {
        let effective = EffectiveConfig::new(config)?;
        Ok(Self {
            config: effective,
            table: ReassemblyTable::new(effective),
            dissector,
            ready: Vec::new(),
            stats: ReassemblyStats::default(),
        })
    }

    /// Processes one captured frame to completion.
    pub fn dispatch<S: OutputSink>(&mut self, frame: &CapturedFrame<'_>, sink: &mut S) {
        self.stats.frames_seen += 1;
        self.sweep(frame.timestamp_ms, sink);

        let Some(descriptor) = self.dissector.dissect(frame) else {
            // Standard, non-IPF path: unfragmented or unclassifiable frames
            // pass through unchanged.
            self.forward_plain(frame, sink);
            return;
        };
        self.stats.fragments_seen += 1;

        if !self.config.engine_enabled {
            self.forward_plain(frame, sink);
            return;
        }

        let flow_hash = ReassemblyTable::flow_hash(&descriptor.flow_key);
        let Some(slot) = self
            .table
            .lookup(&descriptor.flow_key, flow_hash, frame.timestamp_ms)
        else {
            self.stats.table_full_failures += 1;
            self.forward_plain(frame, sink);
            return;
        };

        if !self.table.process_fragment(slot, frame, &descriptor) {
            // The session keeps its segments and finishes on its own
            // schedule; only this fragment is lost to tracking.
            self.stats.session_full_failures += 1;
            trace!(slot, frame_number = frame.frame_number, "fragment rejected by session");
        }

        let session = self.table.session(slot);
        let finished = session.is_finished();

        if self.config.passthrough_fragments {
            let attach = if session.is_complete() {
                self.config.attach_complete
            } else {
                self.config.attach_incomplete
            };
            let status = attach.then(|| session.status_record(self.status_kind()));
            sink.forward_frame(frame, status.as_ref());
            self.stats.passthrough_frames += 1;
        }

        if finished {
            if session.is_complete() {
                self.stats.datagrams_completed += 1;
            } else {
                self.stats.datagrams_timed_out += 1;
            }
            self.ready.push(slot);
        }
        self.drain_ready(sink);
    }

    /// Finishes every session whose deadline has passed and emits their
    /// partial datagrams per the output policy.
    pub fn sweep<S: OutputSink>(&mut self, now_ms: u64, sink: &mut S) {
        let expired = self.table.sweep(now_ms);
        if expired.is_empty() {
            return;
        }
        self.stats.datagrams_timed_out += expired.len() as u64;
        self.ready.extend(expired);
        self.drain_ready(sink);
    }

    fn drain_ready<S: OutputSink>(&mut self, sink: &mut S) {
        for slot in std::mem::take(&mut self.ready) {
            let session = self.table.session(slot);
            let emit = if session.is_complete() {
                self.config.emit_complete
            } else {
                self.config.emit_incomplete
            };
            if emit {
                let status = session.status_record(StatusKind::Reassembled);
                let datagram = self.table.synthesize(slot);
                sink.forward_datagram(&datagram, &status);
                self.stats.datagrams_emitted += 1;
            }
            self.table.close(slot);
        }
    }

    fn forward_plain<S: OutputSink>(&mut self, frame: &CapturedFrame<'_>, sink: &mut S) {
        sink.forward_frame(frame, None);
        self.stats.passthrough_frames += 1;
    }

    fn status_kind(&self) -> StatusKind {
        if self.config.copy_payload {
            StatusKind::Reassembled
        } else {
            StatusKind::Tracking
        }
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }

    pub fn table(&self) -> &ReassemblyTable {
        &self.table
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }
}
