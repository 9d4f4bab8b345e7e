pub mod config;
pub mod dissect;
pub mod error;
pub mod frame;
pub mod reassembly;

pub use config::{EffectiveConfig, ReassemblyConfig};
pub use dissect::{Dissector, FlowKey, FragmentDescriptor, IpDissector, IpVersion};
pub use error::ConfigError;
pub use frame::{CapturedFrame, LinkFormat, OutputSink};
pub use reassembly::{
    ReassemblyDispatcher, ReassemblyStats, ReassemblyStatus, SegmentRecord, StatusKind,
};
