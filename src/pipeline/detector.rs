use image::{GrayImage, RgbImage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::DetectorConfig;
use crate::control::job::PauseGate;
use crate::error::AppError;
use crate::pipeline::types::{
    forward_end, merge_overlapping, DetectedFrame, Frame, Region, RegionSet, StageMessage,
};

/// Motion-detection capability. Stateful across calls so implementations
/// can adapt a background model.
pub trait RegionDetector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Region>, AppError>;
}

/// Builds one fresh detector per job; detector state never outlives a job.
pub trait DetectorFactory: Send + Sync {
    fn create_detector(&self) -> Box<dyn RegionDetector>;
}

/// Second pipeline stage: wraps the external detector, skipping a warm-up
/// window, filtering spurious rectangles, and merging overlaps before
/// forwarding `(frame, regions)` pairs.
pub struct DetectorStage {
    detector: Box<dyn RegionDetector>,
    config: DetectorConfig,
}

impl DetectorStage {
    pub fn new(detector: Box<dyn RegionDetector>, config: DetectorConfig) -> Self {
        Self { detector, config }
    }

    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<StageMessage<Frame>>,
        tx: mpsc::Sender<StageMessage<DetectedFrame>>,
        cancel: CancellationToken,
        mut pause: PauseGate,
    ) -> Result<(), AppError> {
        let mut seen = 0u64;
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => message,
            };
            let frame = match message {
                // Upstream dropped without a marker; it was force-stopped.
                None => break,
                Some(StageMessage::EndOfStream) => {
                    debug!("Detector received end-of-stream");
                    break;
                }
                Some(StageMessage::Item(frame)) => frame,
            };
            pause.wait_while_paused(&cancel).await;

            seen += 1;
            let regions = if seen <= self.config.stabilize_frames {
                // Let the detector's background model settle first.
                RegionSet::new()
            } else {
                match self.detector.detect(&frame.image) {
                    Ok(candidates) => self.finalize(candidates, &frame),
                    Err(e) => {
                        error!("Region detection failed on frame {}: {e}", frame.seq);
                        forward_end(&tx, &cancel).await;
                        return Err(e);
                    }
                }
            };

            let detected = DetectedFrame::new(frame, regions);
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(StageMessage::Item(detected)) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        forward_end(&tx, &cancel).await;
        Ok(())
    }

    /// Drop noise and spurious full-frame rectangles, then merge overlaps
    /// to the fixed point.
    fn finalize(&self, candidates: Vec<Region>, frame: &Frame) -> RegionSet {
        let frame_area = frame.pixel_area();
        let kept: Vec<Region> = candidates
            .into_iter()
            .filter(|region| region.area() >= u64::from(self.config.min_region_area))
            .filter(|region| region.area() * 2 <= frame_area)
            .collect();
        merge_overlapping(kept)
    }
}

/// Reference detector: thresholded luminance differencing against the
/// previous frame, bucketed into grid cells. A stand-in for a proper
/// background-subtraction model; good enough to light up the pipeline.
pub struct LumaDiffDetector {
    threshold: u8,
    cell_size: u32,
    min_changed_fraction: f32,
    previous: Option<GrayImage>,
}

impl LumaDiffDetector {
    pub fn new(threshold: u8, cell_size: u32, min_changed_fraction: f32) -> Self {
        Self {
            threshold,
            cell_size,
            min_changed_fraction,
            previous: None,
        }
    }

    fn changed_cells(&self, previous: &GrayImage, current: &GrayImage) -> Vec<Region> {
        let (width, height) = current.dimensions();
        let cell = self.cell_size.max(1);
        let mut cells = Vec::new();
        let mut cy = 0;
        while cy < height {
            let cell_height = cell.min(height - cy);
            let mut cx = 0;
            while cx < width {
                let cell_width = cell.min(width - cx);
                let mut changed = 0u32;
                for y in cy..cy + cell_height {
                    for x in cx..cx + cell_width {
                        let before = previous.get_pixel(x, y)[0];
                        let after = current.get_pixel(x, y)[0];
                        if before.abs_diff(after) > self.threshold {
                            changed += 1;
                        }
                    }
                }
                let pixels = cell_width * cell_height;
                if changed as f32 >= self.min_changed_fraction * pixels as f32 {
                    cells.push(Region::new(cx, cy, cell_width, cell_height));
                }
                cx += cell;
            }
            cy += cell;
        }
        cells
    }
}

impl Default for LumaDiffDetector {
    fn default() -> Self {
        Self::new(25, 16, 0.1)
    }
}

impl RegionDetector for LumaDiffDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Region>, AppError> {
        let current = image::imageops::grayscale(frame);
        let regions = match self.previous.as_ref() {
            Some(previous) if previous.dimensions() == current.dimensions() => {
                merge_overlapping(self.changed_cells(previous, &current))
            }
            _ => Vec::new(),
        };
        self.previous = Some(current);
        Ok(regions)
    }
}

/// Factory for the reference detector with fixed tuning.
#[derive(Default)]
pub struct LumaDiffDetectorFactory;

impl DetectorFactory for LumaDiffDetectorFactory {
    fn create_detector(&self) -> Box<dyn RegionDetector> {
        Box::new(LumaDiffDetector::default())
    }
}
