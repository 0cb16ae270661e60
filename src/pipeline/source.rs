use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::SourceConfig;
use crate::control::job::PauseGate;
use crate::error::AppError;
use crate::pipeline::types::{forward_end, Frame, StageMessage};

/// Decoder capability: yields raw frames in file order, `None` at the end.
/// The container/codec machinery behind it is not this crate's concern.
pub trait FrameReader: Send {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, AppError>;
}

/// Opens a video locator into a [`FrameReader`].
pub trait SourceOpener: Send + Sync {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameReader>, AppError>;
}

/// First pipeline stage: reads frames in order, paces emission, and
/// terminates its output with exactly one end-of-stream marker on every
/// exit path. The reader is dropped on every path, releasing the
/// underlying capture resource.
pub struct FrameSourceStage {
    opener: Arc<dyn SourceOpener>,
    config: SourceConfig,
}

impl FrameSourceStage {
    pub fn new(opener: Arc<dyn SourceOpener>, config: SourceConfig) -> Self {
        Self { opener, config }
    }

    /// Returns the number of frames emitted.
    pub async fn run(
        self,
        locator: &str,
        tx: mpsc::Sender<StageMessage<Frame>>,
        cancel: CancellationToken,
        mut pause: PauseGate,
    ) -> Result<u64, AppError> {
        let mut reader = match self.opener.open(locator) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Could not open video at {locator}: {e}");
                forward_end(&tx, &cancel).await;
                return Err(e);
            }
        };

        let delay = Duration::from_millis(self.config.frame_delay_ms);
        let mut seq = 0u64;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            pause.wait_while_paused(&cancel).await;
            match reader.next_frame() {
                Ok(Some(image)) => {
                    let frame = Frame::new(image, seq);
                    seq += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = tx.send(StageMessage::Item(frame)) => {
                            if sent.is_err() {
                                // Detector is gone; nothing left to feed.
                                break;
                            }
                        }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Ok(None) => {
                    info!("End of video stream after {seq} frames");
                    break;
                }
                Err(e) => {
                    error!("Frame read failed at {seq}: {e}");
                    forward_end(&tx, &cancel).await;
                    return Err(e);
                }
            }
        }
        forward_end(&tx, &cancel).await;
        Ok(seq)
    }
}

/// Reference source reading an ordered directory of still images, one per
/// frame. Keeps the binary runnable without a codec dependency.
pub struct ImageDirSource;

impl SourceOpener for ImageDirSource {
    fn open(&self, locator: &str) -> Result<Box<dyn FrameReader>, AppError> {
        let entries = std::fs::read_dir(locator).map_err(|e| AppError::Open {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("png" | "jpg" | "jpeg" | "bmp")
                )
            })
            .collect();
        if paths.is_empty() {
            return Err(AppError::Open {
                locator: locator.to_string(),
                reason: "no image frames found".to_string(),
            });
        }
        paths.sort();
        Ok(Box::new(ImageDirReader {
            paths: paths.into_iter(),
            seq: 0,
        }))
    }
}

struct ImageDirReader {
    paths: std::vec::IntoIter<PathBuf>,
    seq: u64,
}

impl FrameReader for ImageDirReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, AppError> {
        let Some(path) = self.paths.next() else {
            return Ok(None);
        };
        let image = image::open(&path).map_err(|e| AppError::Read {
            seq: self.seq,
            reason: format!("{}: {e}", path.display()),
        })?;
        self.seq += 1;
        Ok(Some(image.to_rgb8()))
    }
}
