use std::time::Duration;

use ab_glyph::{FontVec, PxScale};
use chrono::Local;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RendererConfig;
use crate::control::job::PauseGate;
use crate::error::AppError;
use crate::pipeline::types::{DetectedFrame, Frame, Region, StageMessage};

/// Third pipeline stage: redacts each detected region with a blur, draws a
/// border around it, stamps the wall-clock time, and forwards into the
/// bounded hand-off channel. A send here blocks until the dispatcher
/// consumes, which is where backpressure for the whole pipeline forms.
pub struct RendererStage {
    config: RendererConfig,
    font: Option<FontVec>,
}

impl RendererStage {
    pub fn new(config: RendererConfig) -> Self {
        let font = config.timestamp_font.as_ref().and_then(|path| {
            match std::fs::read(path).map_err(AppError::Io).and_then(|data| {
                FontVec::try_from_vec(data)
                    .map_err(|e| AppError::Render(format!("invalid font: {e}")))
            }) {
                Ok(font) => Some(font),
                Err(e) => {
                    warn!(
                        "Timestamp font {} unusable, stamping disabled: {e}",
                        path.display()
                    );
                    None
                }
            }
        });
        if font.is_none() {
            debug!("No timestamp font configured; frames go out unstamped");
        }
        Self { config, font }
    }

    pub async fn run(
        self,
        mut rx: mpsc::Receiver<StageMessage<DetectedFrame>>,
        tx: mpsc::Sender<StageMessage<Frame>>,
        cancel: CancellationToken,
        mut pause: PauseGate,
    ) -> Result<(), AppError> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => message,
            };
            let detected = match message {
                None => break,
                Some(StageMessage::EndOfStream) => {
                    debug!("Renderer received end-of-stream");
                    break;
                }
                Some(StageMessage::Item(detected)) => detected,
            };
            pause.wait_while_paused(&cancel).await;

            let DetectedFrame { mut frame, regions } = detected;
            for region in &regions {
                self.redact(&mut frame.image, region);
                self.draw_border(&mut frame.image, region);
            }
            self.stamp_timestamp(&mut frame.image);

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(StageMessage::Item(frame)) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        self.forward_end_bounded(&tx, &cancel).await;
        Ok(())
    }

    /// The sentinel send must not hang a shutdown: bounded wait, then give
    /// up with a warning.
    async fn forward_end_bounded(
        &self,
        tx: &mpsc::Sender<StageMessage<Frame>>,
        cancel: &CancellationToken,
    ) {
        let limit = Duration::from_millis(self.config.end_forward_timeout_ms);
        tokio::select! {
            _ = cancel.cancelled() => {}
            sent = tokio::time::timeout(limit, tx.send(StageMessage::EndOfStream)) => {
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => debug!("Dispatcher gone before end-of-stream could be forwarded"),
                    Err(_) => warn!("Gave up forwarding end-of-stream after {limit:?}"),
                }
            }
        }
    }

    /// Blur the region sub-rectangle in place.
    fn redact(&self, image: &mut RgbImage, region: &Region) {
        let Some((x, y, width, height)) = clamp_to(image, region) else {
            return;
        };
        let patch = image::imageops::crop_imm(image, x, y, width, height).to_image();
        let blurred = image::imageops::blur(&patch, self.config.blur_sigma);
        image::imageops::replace(image, &blurred, i64::from(x), i64::from(y));
    }

    fn draw_border(&self, image: &mut RgbImage, region: &Region) {
        let Some((x, y, width, height)) = clamp_to(image, region) else {
            return;
        };
        let color = Rgb(self.config.border_color);
        for inset in 0..self.config.border_thickness {
            if width <= inset * 2 || height <= inset * 2 {
                break;
            }
            let rect = Rect::at((x + inset) as i32, (y + inset) as i32)
                .of_size(width - inset * 2, height - inset * 2);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    fn stamp_timestamp(&self, image: &mut RgbImage) {
        let Some(font) = &self.font else {
            return;
        };
        let text = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        draw_text_mut(
            image,
            Rgb(self.config.timestamp_color),
            self.config.timestamp_x,
            self.config.timestamp_y,
            PxScale::from(self.config.timestamp_scale),
            font,
            &text,
        );
    }
}

fn clamp_to(image: &RgbImage, region: &Region) -> Option<(u32, u32, u32, u32)> {
    let x = region.x.min(image.width());
    let y = region.y.min(image.height());
    let width = region.width.min(image.width() - x);
    let height = region.height.min(image.height() - y);
    if width == 0 || height == 0 {
        return None;
    }
    Some((x, y, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PausePolicy;
    use crate::control::job::JobState;
    use tokio::sync::watch;

    fn stage(channel_capacity: usize) -> RendererStage {
        RendererStage::new(RendererConfig {
            channel_capacity,
            end_forward_timeout_ms: 200,
            ..RendererConfig::default()
        })
    }

    fn gate() -> (watch::Sender<JobState>, PauseGate) {
        let (tx, rx) = watch::channel(JobState::Running);
        (tx, PauseGate::new(PausePolicy::DispatchOnly, rx))
    }

    /// Checkerboard content so blurring provably changes pixels.
    fn checkerboard(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[tokio::test]
    async fn redacts_region_and_leaves_rest_untouched() {
        let original = checkerboard(40, 40);
        let region = Region::new(8, 8, 12, 12);
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let (_state_tx, gate) = gate();

        in_tx
            .send(StageMessage::Item(DetectedFrame::new(
                Frame::new(original.clone(), 0),
                vec![region],
            )))
            .await
            .expect("feed");
        in_tx.send(StageMessage::EndOfStream).await.expect("feed");
        stage(4)
            .run(in_rx, out_tx, cancel, gate)
            .await
            .expect("renderer run");

        let Some(StageMessage::Item(frame)) = out_rx.recv().await else {
            panic!("expected a rendered frame");
        };
        assert!(matches!(
            out_rx.recv().await,
            Some(StageMessage::EndOfStream)
        ));

        let mut changed_inside = false;
        for (x, y, pixel) in frame.image.enumerate_pixels() {
            let inside = x >= region.x && x < region.right() && y >= region.y && y < region.bottom();
            if inside {
                if pixel != original.get_pixel(x, y) {
                    changed_inside = true;
                }
            } else {
                assert_eq!(
                    pixel,
                    original.get_pixel(x, y),
                    "pixel outside the region changed at ({x},{y})"
                );
            }
        }
        assert!(changed_inside, "redaction left the region bit-identical");
    }

    #[tokio::test]
    async fn border_uses_configured_color() {
        let mut config = RendererConfig {
            border_color: [255, 0, 0],
            border_thickness: 1,
            ..RendererConfig::default()
        };
        config.end_forward_timeout_ms = 200;
        let stage = RendererStage::new(config);
        let region = Region::new(4, 4, 10, 10);
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (_state_tx, gate) = gate();

        in_tx
            .send(StageMessage::Item(DetectedFrame::new(
                Frame::new(RgbImage::new(32, 32), 0),
                vec![region],
            )))
            .await
            .expect("feed");
        in_tx.send(StageMessage::EndOfStream).await.expect("feed");
        stage
            .run(in_rx, out_tx, CancellationToken::new(), gate)
            .await
            .expect("renderer run");

        let Some(StageMessage::Item(frame)) = out_rx.recv().await else {
            panic!("expected a rendered frame");
        };
        // Top-left corner of the border rectangle.
        assert_eq!(frame.image.get_pixel(4, 4), &Rgb([255, 0, 0]));
    }

    #[tokio::test]
    async fn sentinel_forward_gives_up_after_timeout() {
        // Full capacity-1 channel with no consumer: the bounded wait must
        // expire instead of hanging the stage forever.
        let (in_tx, in_rx) = mpsc::channel::<StageMessage<DetectedFrame>>(4);
        let (out_tx, _out_rx_kept) = mpsc::channel(1);
        out_tx
            .try_send(StageMessage::Item(Frame::new(RgbImage::new(2, 2), 99)))
            .expect("prefill");
        in_tx.send(StageMessage::EndOfStream).await.expect("feed");
        let (_state_tx, gate) = gate();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            stage(1).run(in_rx, out_tx, CancellationToken::new(), gate),
        )
        .await;
        assert!(result.is_ok(), "renderer hung on the sentinel forward");
    }

    #[tokio::test]
    async fn out_of_bounds_regions_are_clamped_not_panicked() {
        let region = Region::new(28, 28, 20, 20);
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (_state_tx, gate) = gate();
        in_tx
            .send(StageMessage::Item(DetectedFrame::new(
                Frame::new(checkerboard(32, 32), 0),
                vec![region],
            )))
            .await
            .expect("feed");
        in_tx.send(StageMessage::EndOfStream).await.expect("feed");
        stage(4)
            .run(in_rx, out_tx, CancellationToken::new(), gate)
            .await
            .expect("renderer run");
        assert!(matches!(out_rx.recv().await, Some(StageMessage::Item(_))));
    }
}
