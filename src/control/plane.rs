use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::control::job::{Job, JobState, PauseGate, SessionId};
use crate::error::AppError;
use crate::events::{EventSink, ViewerEvent};
use crate::pipeline::detector::DetectorFactory;
use crate::pipeline::dispatcher::{DispatchOutcome, DispatcherStage};
use crate::pipeline::encoding::{FrameEncoder, JpegFrameEncoder};
use crate::pipeline::renderer::RendererStage;
use crate::pipeline::source::{FrameSourceStage, SourceOpener};

/// Owns the single in-flight job and every state transition it makes.
/// Stages read state through a watch channel and stop through a
/// cancellation token; nothing else writes job state.
#[derive(Clone)]
pub struct ControlPlane {
    inner: Arc<PlaneShared>,
}

struct PlaneShared {
    config: Configuration,
    opener: Arc<dyn SourceOpener>,
    detectors: Arc<dyn DetectorFactory>,
    encoder: Arc<dyn FrameEncoder>,
    events: Arc<dyn EventSink>,
    state_tx: watch::Sender<JobState>,
    active: Mutex<Option<ActiveJob>>,
}

struct ActiveJob {
    job: Job,
    cancel: CancellationToken,
    stages: Vec<StageTask>,
}

struct StageTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl ControlPlane {
    pub fn builder() -> ControlPlaneBuilder {
        ControlPlaneBuilder::new()
    }

    /// Current job state; `Idle` before the first start, `Stopped` after a
    /// job ends.
    pub fn state(&self) -> JobState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<JobState> {
        self.inner.state_tx.subscribe()
    }

    /// Resolves once the active job reaches `Stopped`. Returns immediately
    /// when no job ever started.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            if matches!(*rx.borrow_and_update(), JobState::Idle | JobState::Stopped) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Start processing a video. Fails with `Conflict` while another job
    /// is active; the pipeline is spawned fully wired before this returns.
    pub async fn start(&self, locator: &str, session: SessionId) -> Result<Uuid, AppError> {
        let mut active = self.inner.active.lock().await;
        if active.is_some() {
            warn!("Start requested while a job is active");
            return Err(AppError::Conflict);
        }

        let job = Job::new(locator.to_string(), session);
        let job_id = job.id;
        info!("Starting job {job_id} for {locator} (session {session})");

        let cancel = CancellationToken::new();
        let config = &self.inner.config;
        let policy = config.control.pause_policy;
        // Every inter-stage channel is bounded so a stalled viewer
        // back-pressures all the way to the source.
        let (frame_tx, frame_rx) = mpsc::channel(config.source.channel_capacity);
        let (detect_tx, detect_rx) = mpsc::channel(config.detector.channel_capacity);
        let (render_tx, render_rx) = mpsc::channel(config.renderer.channel_capacity);

        self.inner
            .state_tx
            .send_replace(JobState::Running);

        let source = FrameSourceStage::new(self.inner.opener.clone(), config.source.clone());
        let source_handle = tokio::spawn({
            let locator = locator.to_string();
            let cancel = cancel.clone();
            let gate = PauseGate::new(policy, self.inner.state_tx.subscribe());
            async move {
                if let Err(e) = source.run(&locator, frame_tx, cancel, gate).await {
                    error!("Source stage ended with error: {e}");
                }
            }
        });

        let detector = crate::pipeline::detector::DetectorStage::new(
            self.inner.detectors.create_detector(),
            config.detector.clone(),
        );
        let detector_handle = tokio::spawn({
            let cancel = cancel.clone();
            let gate = PauseGate::new(policy, self.inner.state_tx.subscribe());
            async move {
                if let Err(e) = detector.run(frame_rx, detect_tx, cancel, gate).await {
                    error!("Detector stage ended with error: {e}");
                }
            }
        });

        let renderer = RendererStage::new(config.renderer.clone());
        let renderer_handle = tokio::spawn({
            let cancel = cancel.clone();
            let gate = PauseGate::new(policy, self.inner.state_tx.subscribe());
            async move {
                if let Err(e) = renderer.run(detect_rx, render_tx, cancel, gate).await {
                    error!("Renderer stage ended with error: {e}");
                }
            }
        });

        let dispatcher = DispatcherStage::new(
            config.dispatcher.clone(),
            self.inner.encoder.clone(),
            self.inner.events.clone(),
        );
        let (done_tx, done_rx) = oneshot::channel();
        let dispatcher_handle = tokio::spawn({
            let cancel = cancel.clone();
            let state_rx = self.inner.state_tx.subscribe();
            async move {
                let outcome = dispatcher.run(render_rx, state_rx, cancel).await;
                let _ = done_tx.send(outcome);
            }
        });

        // Natural completion is detected here; explicit stop never waits
        // on this task.
        let plane = self.clone();
        tokio::spawn(async move {
            if let Ok(DispatchOutcome::Completed { frames }) = done_rx.await {
                plane.finish_natural(frames).await;
            }
        });

        *active = Some(ActiveJob {
            job,
            cancel,
            stages: vec![
                StageTask {
                    name: "source",
                    handle: source_handle,
                },
                StageTask {
                    name: "detector",
                    handle: detector_handle,
                },
                StageTask {
                    name: "renderer",
                    handle: renderer_handle,
                },
                StageTask {
                    name: "dispatcher",
                    handle: dispatcher_handle,
                },
            ],
        });
        drop(active);

        self.inner
            .events
            .emit(ViewerEvent::Message {
                text: format!("Processing and streaming video: {}", display_name(locator)),
            })
            .await;
        Ok(job_id)
    }

    pub async fn pause(&self) {
        let mut active = self.inner.active.lock().await;
        match active.as_mut() {
            Some(entry) if entry.job.state == JobState::Running => {
                entry.job.state = JobState::Paused;
                self.inner.state_tx.send_replace(JobState::Paused);
                drop(active);
                info!("Streaming paused");
                self.emit_message("Stream paused").await;
                self.inner.events.emit(ViewerEvent::StreamPaused).await;
            }
            _ => {
                drop(active);
                self.emit_message("No active stream to pause").await;
            }
        }
    }

    pub async fn resume(&self) {
        let mut active = self.inner.active.lock().await;
        match active.as_mut() {
            Some(entry) if matches!(entry.job.state, JobState::Running | JobState::Paused) => {
                entry.job.state = JobState::Running;
                self.inner.state_tx.send_replace(JobState::Running);
                drop(active);
                info!("Streaming resumed");
                self.emit_message("Stream resumed").await;
                self.inner.events.emit(ViewerEvent::StreamResumed).await;
            }
            _ => {
                drop(active);
                self.emit_message("No active stream to resume").await;
            }
        }
    }

    /// Idempotent. Signals every stage, waits out the grace period,
    /// force-terminates stragglers, and deletes the job's temp file.
    pub async fn stop(&self) {
        let taken = {
            let mut active = self.inner.active.lock().await;
            match active.take() {
                Some(mut entry) => {
                    entry.job.state = JobState::Stopping;
                    self.inner.state_tx.send_replace(JobState::Stopping);
                    Some(entry)
                }
                None => None,
            }
        };

        let mut cleaned = false;
        if let Some(entry) = taken {
            info!("Stopping job {}", entry.job.id);
            entry.cancel.cancel();
            self.drain_stages(entry.stages).await;
            cleaned = self.cleanup_temp(&entry.job).await;
        }
        self.publish_stopped().await;

        let suffix = if cleaned { " Video file deleted." } else { "" };
        self.emit_message(&format!(
            "Stopping video processing and streaming...{suffix}"
        ))
        .await;
        self.inner
            .events
            .emit(ViewerEvent::StreamStopped { reset: true })
            .await;
        info!("Stopping video processing and streaming");
    }

    /// Viewer went away. Tears the job down only when the disconnecting
    /// session owns it.
    pub async fn on_disconnect(&self, session: SessionId) {
        let owns = {
            let active = self.inner.active.lock().await;
            active
                .as_ref()
                .map(|entry| entry.job.owner == session)
                .unwrap_or(false)
        };
        if owns {
            info!("Owning session {session} disconnected; stopping job");
            self.stop().await;
        } else {
            debug!("Session {session} disconnected without an active job");
        }
    }

    /// The dispatcher saw the end-of-stream marker: wrap up, clean up, and
    /// release the job slot. A concurrent stop() wins the race by taking
    /// the slot first.
    async fn finish_natural(&self, frames: u64) {
        let taken = self.inner.active.lock().await.take();
        let Some(entry) = taken else {
            return;
        };
        info!("Job {} completed after {frames} frames", entry.job.id);
        self.drain_stages(entry.stages).await;
        self.cleanup_temp(&entry.job).await;
        self.publish_stopped().await;
        self.inner
            .events
            .emit(ViewerEvent::ProcessingComplete { frames })
            .await;
        self.inner
            .events
            .emit(ViewerEvent::Complete {
                text: "Finished processing and streaming video".to_string(),
            })
            .await;
        info!("Processing and streaming complete");
    }

    /// A new job may have claimed the slot while this teardown ran; only
    /// publish `Stopped` when the slot is still free.
    async fn publish_stopped(&self) {
        let active = self.inner.active.lock().await;
        if active.is_none() {
            self.inner.state_tx.send_replace(JobState::Stopped);
        }
    }

    /// Wait out the grace period for all stages together, then abort
    /// whatever is still running.
    async fn drain_stages(&self, stages: Vec<StageTask>) {
        let grace = Duration::from_millis(self.inner.config.control.grace_period_ms);
        let deadline = Instant::now() + grace;
        for mut stage in stages {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, &mut stage.handle).await {
                Ok(Ok(())) => debug!("Stage {} exited cleanly", stage.name),
                Ok(Err(e)) => warn!("Stage {} join failed: {e}", stage.name),
                Err(_) => {
                    warn!(
                        "Stage {} still running past the grace period; force-terminating",
                        stage.name
                    );
                    stage.handle.abort();
                }
            }
        }
    }

    /// Best-effort temp file removal; failure is logged, never raised.
    async fn cleanup_temp(&self, job: &Job) -> bool {
        let Some(path) = &job.temp_path else {
            return false;
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!("Removed temporary file {}", path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Temporary file {} already gone", path.display());
                false
            }
            Err(e) => {
                let cleanup = AppError::Cleanup {
                    path: path.clone(),
                    source: e,
                };
                error!("{cleanup}");
                false
            }
        }
    }

    async fn emit_message(&self, text: &str) {
        self.inner
            .events
            .emit(ViewerEvent::Message {
                text: text.to_string(),
            })
            .await;
    }
}

fn display_name(locator: &str) -> String {
    Path::new(locator)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| locator.to_string())
}

pub struct ControlPlaneBuilder {
    config: Configuration,
    opener: Option<Arc<dyn SourceOpener>>,
    detectors: Option<Arc<dyn DetectorFactory>>,
    encoder: Option<Arc<dyn FrameEncoder>>,
    events: Option<Arc<dyn EventSink>>,
}

impl ControlPlaneBuilder {
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
            opener: None,
            detectors: None,
            encoder: None,
            events: None,
        }
    }

    pub fn configuration(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    pub fn source_opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn detector_factory(mut self, detectors: Arc<dyn DetectorFactory>) -> Self {
        self.detectors = Some(detectors);
        self
    }

    // Overrides the JPEG encoder derived from the dispatcher config.
    pub fn frame_encoder(mut self, encoder: Arc<dyn FrameEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<ControlPlane, AppError> {
        let opener = self
            .opener
            .ok_or_else(|| AppError::InvalidConfig("source opener not set".to_string()))?;
        let detectors = self
            .detectors
            .ok_or_else(|| AppError::InvalidConfig("detector factory not set".to_string()))?;
        let events = self
            .events
            .ok_or_else(|| AppError::InvalidConfig("event sink not set".to_string()))?;
        let encoder = self.encoder.unwrap_or_else(|| {
            Arc::new(JpegFrameEncoder::new(self.config.dispatcher.jpeg_quality))
        });
        let (state_tx, _state_rx) = watch::channel(JobState::Idle);
        Ok(ControlPlane {
            inner: Arc::new(PlaneShared {
                config: self.config,
                opener,
                detectors,
                encoder,
                events,
                state_tx,
                active: Mutex::new(None),
            }),
        })
    }
}

impl Default for ControlPlaneBuilder {
    fn default() -> Self {
        Self::new()
    }
}
