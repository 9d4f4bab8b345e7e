use thiserror::Error;

/// Construction-time configuration faults.
///
/// Runtime fragment failures (table full, session full, malformed fragment)
/// are deliberately not represented here: they degrade to passthrough plus a
/// counter increment and never abort the capture loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("table size must be nonzero")]
    ZeroTableSize,

    #[error("max fragment count must be nonzero")]
    ZeroFragmentCount,

    #[error("max datagram size must be nonzero")]
    ZeroDatagramSize,

    #[error("buffer slice of {slice} bytes cannot hold {required} bytes per slot")]
    BufferTooSmall { slice: usize, required: usize },
}
