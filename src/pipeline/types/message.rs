use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Envelope flowing through every inter-stage channel. Each stage sends
/// exactly one `EndOfStream`, always last, so downstream stages terminate
/// instead of blocking forever.
#[derive(Debug, Clone)]
pub enum StageMessage<T> {
    Item(T),
    EndOfStream,
}

/// Forward the end-of-stream marker, waking on cancellation so a stopped
/// pipeline never wedges on a full channel.
pub(crate) async fn forward_end<T>(tx: &mpsc::Sender<StageMessage<T>>, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tx.send(StageMessage::EndOfStream) => {
            if result.is_err() {
                debug!("downstream stage gone before end-of-stream could be forwarded");
            }
        }
    }
}
