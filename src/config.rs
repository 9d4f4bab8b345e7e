use crate::error::ConfigError;

/// Bytes reserved at the front of each slot's buffer slice for the
/// encapsulating link and IP headers of the synthesized datagram. Large
/// enough for a cooked-capture link header, an IPv6 fixed header and a
/// generous run of extension headers or IPv4 options.
pub const ENCAP_HEADER_CAPACITY: usize = 128;

/// User-facing configuration for the reassembly engine.
///
/// Read once at construction and folded into an [`EffectiveConfig`]; changes
/// after construction have no effect on a running dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct ReassemblyConfig {
    /// Largest reassembled payload the engine will hold per datagram.
    pub max_dgram_bytes: u32,
    /// Total arena size shared by all slots; each slot receives
    /// `buffer_size / table_size` bytes.
    pub buffer_size: usize,
    /// Number of reassembly slots; fixed for the lifetime of the table.
    pub table_size: usize,
    /// Most fragments tracked per datagram; further fragments for the flow
    /// are rejected and the datagram finishes with holes.
    pub max_fragment_count: usize,
    /// How long a session may sit without completing before it is reclaimed.
    pub timeout_ms: u64,
    /// Finish a session immediately as timed-out-incomplete when the last
    /// fragment arrives while holes remain, instead of waiting out the clock.
    pub timeout_on_last_fragment: bool,
    /// Copy fragment payloads into the slot buffer and allow datagram
    /// synthesis.
    pub enable_reassembly: bool,
    /// Track fragment geometry (segments, holes, overlaps) without requiring
    /// payload copies.
    pub enable_tracking: bool,
    /// Forward every original fragment to the output sink.
    pub passthrough_fragments: bool,
    /// Annotate passthrough fragments of completed datagrams.
    pub attach_complete: bool,
    /// Annotate passthrough fragments of incomplete datagrams.
    pub attach_incomplete: bool,
    /// Emit a synthesized datagram when a session completes.
    pub emit_complete_datagrams: bool,
    /// Emit a synthesized (partial) datagram when a session times out.
    pub emit_incomplete_datagrams: bool,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        let max_dgram_bytes = 65_535u32;
        let table_size = 32usize;
        Self {
            max_dgram_bytes,
            buffer_size: table_size * (ENCAP_HEADER_CAPACITY + max_dgram_bytes as usize),
            table_size,
            max_fragment_count: 16,
            timeout_ms: 60_000,
            timeout_on_last_fragment: false,
            enable_reassembly: true,
            enable_tracking: true,
            passthrough_fragments: true,
            attach_complete: true,
            attach_incomplete: true,
            emit_complete_datagrams: true,
            emit_incomplete_datagrams: false,
        }
    }
}

/// Validated configuration with the hot-path boolean combinations
/// pre-computed, so the dispatcher never re-derives policy per fragment.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveConfig {
    pub max_dgram_bytes: u32,
    pub table_size: usize,
    pub slice_size: usize,
    pub max_fragment_count: usize,
    pub timeout_ms: u64,
    pub timeout_on_last_fragment: bool,
    /// Any session state is kept at all (tracking or reassembly).
    pub engine_enabled: bool,
    /// Fragment payload bytes are copied into the slot buffer.
    pub copy_payload: bool,
    pub passthrough_fragments: bool,
    /// Passthrough fragments of complete datagrams carry a status record.
    pub attach_complete: bool,
    /// Passthrough fragments of incomplete datagrams carry a status record.
    pub attach_incomplete: bool,
    /// Completed datagrams are synthesized and emitted.
    pub emit_complete: bool,
    /// Timed-out datagrams are synthesized and emitted with their holes.
    pub emit_incomplete: bool,
}

impl EffectiveConfig {
    pub fn new(config: &ReassemblyConfig) -> Result<Self, ConfigError> {
        if config.table_size == 0 {
            return Err(ConfigError::ZeroTableSize);
        }
        if config.max_fragment_count == 0 {
            return Err(ConfigError::ZeroFragmentCount);
        }
        if config.max_dgram_bytes == 0 {
            return Err(ConfigError::ZeroDatagramSize);
        }

        let slice_size = config.buffer_size / config.table_size;
        let required = ENCAP_HEADER_CAPACITY + config.max_dgram_bytes as usize;
        if slice_size < required {
            return Err(ConfigError::BufferTooSmall {
                slice: slice_size,
                required,
            });
        }

        let engine_enabled = config.enable_reassembly || config.enable_tracking;
        Ok(Self {
            max_dgram_bytes: config.max_dgram_bytes,
            table_size: config.table_size,
            slice_size,
            max_fragment_count: config.max_fragment_count,
            timeout_ms: config.timeout_ms,
            timeout_on_last_fragment: config.timeout_on_last_fragment,
            engine_enabled,
            copy_payload: config.enable_reassembly,
            passthrough_fragments: config.passthrough_fragments,
            attach_complete: engine_enabled && config.attach_complete,
            attach_incomplete: engine_enabled && config.attach_incomplete,
            emit_complete: config.enable_reassembly && config.emit_complete_datagrams,
            emit_incomplete: config.enable_reassembly && config.emit_incomplete_datagrams,
        })
    }
}
