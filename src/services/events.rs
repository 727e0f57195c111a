//! Outbound event sinks.
//!
//! Publishing is fire-and-forget: sinks never block and never report
//! delivery back to the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DEPLOYMENT_STARTED: &str = "deployment.started";
pub const DEPLOYMENT_FINISHED: &str = "deployment.finished";
pub const DEPLOYMENT_ROLLED_BACK: &str = "deployment.rolled_back";
pub const DEPLOYMENT_CANCELLED: &str = "deployment.cancelled";
pub const ROLLBACK_VALIDATED: &str = "rollback.validated";
pub const ROLLBACK_EXECUTED: &str = "rollback.executed";

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

pub trait EventSink: Send + Sync {
    fn publish(&self, topic: &str, payload: serde_json::Value);
}

/// Bounded channel sink. Events are dropped when the channel is full or the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// Create a bounded event channel.
pub fn channel(capacity: usize) -> (ChannelEventSink, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelEventSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl ChannelEventSink {
    /// Events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, topic: &str, payload: serde_json::Value) {
        let event = Event {
            topic: topic.to_string(),
            payload,
            emitted_at: Utc::now(),
        };
        if let Err(e) = self.tx.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "receiver closed",
            };
            tracing::warn!(topic, dropped = total, "Dropped event: {}", reason);
        }
    }
}

/// Writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, topic: &str, payload: serde_json::Value) {
        tracing::info!(topic, "{}", payload);
    }
}
