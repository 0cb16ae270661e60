use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

/// Governs what a pause affects. `DispatchOnly` keeps upstream stages
/// producing into the bounded channels while only viewer-facing dispatch
/// stalls; `WholePipeline` parks every stage until resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausePolicy {
    DispatchOnly,
    WholePipeline,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub renderer: RendererConfig,
    pub dispatcher: DispatcherConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Pacing delay between frame reads, keeps the source from saturating
    /// the detector.
    pub frame_delay_ms: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Frames forwarded without detection so the detector's background
    /// model can warm up.
    pub stabilize_frames: u64,
    /// Candidate rectangles below this pixel area are discarded as noise.
    pub min_region_area: u32,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub blur_sigma: f32,
    pub border_color: [u8; 3],
    pub border_thickness: u32,
    /// Path to a TTF/OTF font for the timestamp overlay. Stamping is
    /// skipped with a warning when unset.
    pub timestamp_font: Option<PathBuf>,
    pub timestamp_color: [u8; 3],
    pub timestamp_scale: f32,
    pub timestamp_x: i32,
    pub timestamp_y: i32,
    /// Capacity of the renderer -> dispatcher channel, the designated
    /// backpressure point.
    pub channel_capacity: usize,
    /// Upper bound on forwarding the end-of-stream marker during shutdown.
    pub end_forward_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub recv_timeout_ms: u64,
    pub paused_delay_ms: u64,
    /// Delay after each dispatched frame, caps the outbound rate.
    pub frame_delay_ms: u64,
    /// Emit a progress event every this many frames.
    pub update_interval: u64,
    /// Emit a diagnostic log line every this many frames.
    pub log_interval: u64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// How long stop() waits for stages to exit before force-terminating.
    pub grace_period_ms: u64,
    pub pause_policy: PausePolicy,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            frame_delay_ms: 30,
            channel_capacity: 8,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            stabilize_frames: 15,
            min_region_area: 500,
            channel_capacity: 8,
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 7.0,
            border_color: [0, 255, 0],
            border_thickness: 2,
            timestamp_font: None,
            timestamp_color: [255, 255, 255],
            timestamp_scale: 24.0,
            timestamp_x: 10,
            timestamp_y: 10,
            channel_capacity: 10,
            end_forward_timeout_ms: 2_000,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            recv_timeout_ms: 500,
            paused_delay_ms: 100,
            frame_delay_ms: 50,
            update_interval: 10,
            log_interval: 50,
            jpeg_quality: 85,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 3_000,
            pause_policy: PausePolicy::DispatchOnly,
        }
    }
}

impl Configuration {
    /// Load configuration from an optional file, overridden by
    /// `MOTION_STREAM`-prefixed environment variables (`__` separates
    /// nesting levels).
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("MOTION_STREAM").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_file_yields_defaults() {
        let configuration = Configuration::load(None).expect("load should succeed");
        assert_eq!(configuration.dispatcher.recv_timeout_ms, 500);
        assert_eq!(configuration.control.pause_policy, PausePolicy::DispatchOnly);
        assert_eq!(configuration.renderer.channel_capacity, 10);
    }
}
