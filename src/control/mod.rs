pub mod job;
pub mod plane;

pub use job::{Job, JobState, PauseGate, SessionId};
pub use plane::{ControlPlane, ControlPlaneBuilder};
