use crate::pipeline::types::{Frame, RegionSet};

/// A frame paired with its finalized motion regions, handed from the
/// detector stage to the renderer.
#[derive(Debug, Clone)]
pub struct DetectedFrame {
    pub frame: Frame,
    pub regions: RegionSet,
}

impl DetectedFrame {
    pub fn new(frame: Frame, regions: RegionSet) -> Self {
        Self { frame, regions }
    }
}
