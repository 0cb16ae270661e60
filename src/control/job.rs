use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PausePolicy;

/// Lifecycle of the single in-flight job. Written only by the control
/// plane, observed by every stage through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// Identifies the viewer session that owns a job. Disconnect of the owner
/// forces the job down the stop path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One end-to-end processing session for a single video.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub locator: String,
    /// Uploaded source file, owned by the job until teardown deletes it.
    pub temp_path: Option<PathBuf>,
    pub owner: SessionId,
    pub state: JobState,
}

impl Job {
    pub fn new(locator: String, owner: SessionId) -> Self {
        // Only plain files are owned uploads; directory and URL locators
        // are not ours to delete.
        let temp_path = Path::new(&locator)
            .is_file()
            .then(|| PathBuf::from(&locator));
        Self {
            id: Uuid::new_v4(),
            locator,
            temp_path,
            owner,
            state: JobState::Running,
        }
    }
}

/// Lets upstream stages park while the job is paused under the
/// `WholePipeline` policy. A no-op under `DispatchOnly`, where pausing
/// throttles dispatch alone.
#[derive(Clone)]
pub struct PauseGate {
    policy: PausePolicy,
    state: watch::Receiver<JobState>,
}

impl PauseGate {
    pub fn new(policy: PausePolicy, state: watch::Receiver<JobState>) -> Self {
        Self { policy, state }
    }

    pub async fn wait_while_paused(&mut self, cancel: &CancellationToken) {
        if self.policy != PausePolicy::WholePipeline {
            return;
        }
        loop {
            if *self.state.borrow_and_update() != JobState::Paused {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn dispatch_only_gate_never_blocks() {
        let (_tx, rx) = watch::channel(JobState::Paused);
        let mut gate = PauseGate::new(PausePolicy::DispatchOnly, rx);
        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_millis(50), gate.wait_while_paused(&cancel))
            .await
            .expect("gate must not block under dispatch-only policy");
    }

    #[tokio::test]
    async fn whole_pipeline_gate_releases_on_resume() {
        let (tx, rx) = watch::channel(JobState::Paused);
        let mut gate = PauseGate::new(PausePolicy::WholePipeline, rx);
        let cancel = CancellationToken::new();
        let waiter = tokio::spawn(async move {
            gate.wait_while_paused(&cancel).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        tx.send(JobState::Running).expect("receiver alive");
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("gate releases after resume")
            .expect("waiter task");
    }

    #[tokio::test]
    async fn whole_pipeline_gate_releases_on_cancel() {
        let (_tx, rx) = watch::channel(JobState::Paused);
        let mut gate = PauseGate::new(PausePolicy::WholePipeline, rx);
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(50), gate.wait_while_paused(&cancel))
            .await
            .expect("cancelled gate must release");
    }
}
