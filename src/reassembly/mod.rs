pub mod dispatch;
pub mod segment;
pub mod session;
pub mod status;
pub mod table;
pub mod timeout;

pub use dispatch::{ReassemblyDispatcher, ReassemblyStats};
pub use segment::{Coverage, Segment, SegmentTracker};
pub use session::{ReassemblySession, SlotState};
pub use status::{ReassemblyStatus, SegmentRecord, StatusKind};
pub use table::ReassemblyTable;
pub use timeout::{TimeoutHandle, TimeoutQueue};
