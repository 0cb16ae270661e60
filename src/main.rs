use std::path::PathBuf;
use std::sync::Arc;

use motion_stream::config::Configuration;
use motion_stream::control::{ControlPlane, SessionId};
use motion_stream::error::AppError;
use motion_stream::events::JsonLineSink;
use motion_stream::pipeline::{ImageDirSource, LumaDiffDetectorFactory};
use tracing::{info, Level};

fn init_logging() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();

    let locator = std::env::args().nth(1).ok_or_else(|| {
        AppError::InvalidConfig("usage: motion-stream <frame-directory>".to_string())
    })?;
    let config_path = std::env::var_os("MOTION_STREAM_CONFIG").map(PathBuf::from);
    let configuration = Configuration::load(config_path.as_deref())?;

    let plane = ControlPlane::builder()
        .configuration(configuration)
        .source_opener(Arc::new(ImageDirSource))
        .detector_factory(Arc::new(LumaDiffDetectorFactory))
        .event_sink(Arc::new(JsonLineSink))
        .build()?;

    let session = SessionId::new();
    plane.start(&locator, session).await?;

    tokio::select! {
        _ = plane.wait_until_stopped() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; stopping stream");
            plane.on_disconnect(session).await;
        }
    }
    Ok(())
}
