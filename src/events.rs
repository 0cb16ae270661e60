use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tracing::error;

/// Events emitted to the connected viewer. Serialized as tagged JSON so a
/// transport layer can forward them verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewerEvent {
    Message {
        text: String,
    },
    Frame {
        #[serde(serialize_with = "serialize_base64")]
        data: Bytes,
        seq: u64,
    },
    ProcessingProgress {
        frames: u64,
        status: String,
        percent: u32,
    },
    StreamPaused,
    StreamResumed,
    StreamStopped {
        reset: bool,
    },
    ProcessingComplete {
        frames: u64,
    },
    Complete {
        text: String,
    },
}

fn serialize_base64<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

/// Abstract viewer transport. The control plane and dispatcher only need
/// "emit an event"; delivery is somebody else's problem.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ViewerEvent);
}

/// Sink backed by an in-process channel, used by tests and embedders that
/// forward events themselves.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ViewerEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ViewerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: ViewerEvent) {
        // Receiver gone means the viewer went away; disconnect handling
        // happens in the control plane, not here.
        let _ = self.tx.send(event);
    }
}

/// Sink printing each event as one JSON line on stdout. Stands in for the
/// socket transport when running the binary directly.
pub struct JsonLineSink;

#[async_trait]
impl EventSink for JsonLineSink {
    async fn emit(&self, event: ViewerEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("Failed to serialize viewer event: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_event_serializes_data_as_base64() {
        let event = ViewerEvent::Frame {
            data: Bytes::from_static(b"\xff\xd8\xff"),
            seq: 7,
        };
        let json = serde_json::to_string(&event).expect("serializable");
        assert!(json.contains("\"event\":\"frame\""));
        assert!(json.contains("\"seq\":7"));
        assert!(json.contains(&base64::engine::general_purpose::STANDARD.encode(b"\xff\xd8\xff")));
    }

    #[test]
    fn stop_event_carries_reset_flag() {
        let json = serde_json::to_string(&ViewerEvent::StreamStopped { reset: true })
            .expect("serializable");
        assert_eq!(json, "{\"event\":\"stream_stopped\",\"reset\":true}");
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(ViewerEvent::Message {
            text: "a".to_string(),
        })
        .await;
        sink.emit(ViewerEvent::StreamPaused).await;
        assert_eq!(
            rx.recv().await,
            Some(ViewerEvent::Message {
                text: "a".to_string()
            })
        );
        assert_eq!(rx.recv().await, Some(ViewerEvent::StreamPaused));
    }
}
