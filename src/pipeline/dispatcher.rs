use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DispatcherConfig;
use crate::control::job::JobState;
use crate::events::{EventSink, ViewerEvent};
use crate::pipeline::encoding::FrameEncoder;
use crate::pipeline::types::{Frame, StageMessage};

/// How a dispatch run ended: `Completed` on the natural end-of-stream,
/// `Aborted` when the stop signal cut it short. `frames` counts frames
/// actually delivered to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed { frames: u64 },
    Aborted { frames: u64 },
}

/// Final pipeline stage: drains the bounded hand-off channel under a
/// receive timeout, encodes frames, and emits viewer events. Pause
/// throttles dispatch without consuming; stop aborts without draining.
pub struct DispatcherStage {
    config: DispatcherConfig,
    encoder: Arc<dyn FrameEncoder>,
    events: Arc<dyn EventSink>,
}

impl DispatcherStage {
    pub fn new(
        config: DispatcherConfig,
        encoder: Arc<dyn FrameEncoder>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            encoder,
            events,
        }
    }

    pub async fn run(
        self,
        mut rx: mpsc::Receiver<StageMessage<Frame>>,
        mut state: watch::Receiver<JobState>,
        cancel: CancellationToken,
    ) -> DispatchOutcome {
        let recv_timeout = Duration::from_millis(self.config.recv_timeout_ms);
        let paused_delay = Duration::from_millis(self.config.paused_delay_ms);
        let frame_delay = Duration::from_millis(self.config.frame_delay_ms);
        let mut frames = 0u64;

        loop {
            if *state.borrow_and_update() == JobState::Paused {
                tokio::select! {
                    _ = cancel.cancelled() => return DispatchOutcome::Aborted { frames },
                    _ = tokio::time::sleep(paused_delay) => {}
                }
                continue;
            }

            let received = tokio::select! {
                _ = cancel.cancelled() => return DispatchOutcome::Aborted { frames },
                received = tokio::time::timeout(recv_timeout, rx.recv()) => received,
            };
            let frame = match received {
                // Nothing queued yet; keep draining.
                Err(_) => continue,
                Ok(None) => {
                    warn!("Hand-off channel closed without end-of-stream");
                    return DispatchOutcome::Aborted { frames };
                }
                Ok(Some(StageMessage::EndOfStream)) => {
                    info!("Dispatcher drained the stream: {frames} frames delivered");
                    return DispatchOutcome::Completed { frames };
                }
                Ok(Some(StageMessage::Item(frame))) => frame,
            };

            match self.encoder.encode(&frame) {
                Ok(data) => {
                    frames += 1;
                    self.events
                        .emit(ViewerEvent::Frame {
                            data,
                            seq: frame.seq,
                        })
                        .await;
                    if frames % self.config.update_interval == 0 {
                        self.events
                            .emit(ViewerEvent::ProcessingProgress {
                                frames,
                                status: "processing".to_string(),
                                // Coarse estimate; the source length is unknown.
                                percent: (frames / 30).min(99) as u32,
                            })
                            .await;
                    }
                    if frames % self.config.log_interval == 0 {
                        info!("Processed and streamed {frames} frames");
                    }
                }
                Err(e) => {
                    error!("Failed to encode frame {}: {e}", frame.seq);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return DispatchOutcome::Aborted { frames },
                _ = tokio::time::sleep(frame_delay) => {}
            }
        }
    }
}
