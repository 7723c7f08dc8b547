//! Status events emitted on every task state transition

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::workflow::task::TaskState;

/// One task state transition
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub request_id: String,
    pub node_id: String,
    pub service_name: String,
    pub state: TaskState,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn now(request_id: &str, service_key: &str, state: TaskState) -> Self {
        let (node_id, service_name) = service_key
            .split_once('.')
            .unwrap_or((service_key, ""));
        Self {
            request_id: request_id.to_string(),
            node_id: node_id.to_string(),
            service_name: service_name.to_string(),
            state,
            timestamp: Utc::now(),
        }
    }
}

/// Fire-and-forget receiver of status events.
///
/// `emit` is called from inside the orchestrator loop and must never block.
pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

/// Discards every event
#[derive(Debug, Clone, Default)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn emit(&self, _event: StatusEvent) {}
}

/// Forwards events to the `log` facade
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn emit(&self, event: StatusEvent) {
        log::debug!(
            "[{}] {}.{} -> {} at {}",
            event.request_id,
            event.node_id,
            event.service_name,
            event.state,
            event.timestamp.to_rfc3339()
        );
    }
}

/// Pushes events onto an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, event: StatusEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_splits_service_key() {
        let event = StatusEvent::now("req-1", "node_a.summarize", TaskState::Running);
        assert_eq!(event.node_id, "node_a");
        assert_eq!(event.service_name, "summarize");
        assert_eq!(event.state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(StatusEvent::now("r", "a.b", TaskState::Completed));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.request_id, "r");
        assert_eq!(event.state, TaskState::Completed);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(StatusEvent::now("r", "a.b", TaskState::Failed));
    }
}
