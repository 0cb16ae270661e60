pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod pipeline;

pub use config::{Configuration, PausePolicy};
pub use control::{ControlPlane, ControlPlaneBuilder, JobState, SessionId};
pub use error::AppError;
pub use events::{ChannelEventSink, EventSink, JsonLineSink, ViewerEvent};
