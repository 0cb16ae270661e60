mod detected_frame;
mod frame;
mod message;
mod region;

pub use detected_frame::DetectedFrame;
pub use frame::Frame;
pub(crate) use message::forward_end;
pub use message::StageMessage;
pub use region::{merge_overlapping, Region, RegionSet};
