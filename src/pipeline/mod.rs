pub mod detector;
pub mod dispatcher;
pub mod encoding;
pub mod renderer;
pub mod source;
pub mod types;

pub use detector::{
    DetectorFactory, DetectorStage, LumaDiffDetector, LumaDiffDetectorFactory, RegionDetector,
};
pub use dispatcher::{DispatchOutcome, DispatcherStage};
pub use encoding::{FrameEncoder, JpegFrameEncoder};
pub use renderer::RendererStage;
pub use source::{FrameReader, FrameSourceStage, ImageDirSource, SourceOpener};
pub use types::{DetectedFrame, Frame, Region, RegionSet, StageMessage};
