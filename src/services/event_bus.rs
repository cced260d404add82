//! In-process publish/subscribe for device/task/constellation events.
//!
//! A single `tokio::sync::broadcast` sender fans out to every subscriber,
//! each message carries a monotonic sequence number, and a lagging
//! subscriber observes a gap rather than blocking the publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::message::ActionResult;
use crate::services::types::DisconnectReason;

/// Monotonic publish order, unique within one `EventBus` instance.
pub type SequenceNumber = u64;

/// Tagged event kinds consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreEvent {
    DeviceStatusChanged { device_id: String, from: String, to: String, reason: Option<String> },
    TaskStarted { constellation_id: Uuid, task_id: Uuid, device_id: String },
    TaskCompleted { constellation_id: Uuid, task_id: Uuid, result: Value },
    TaskFailed { constellation_id: Uuid, task_id: Uuid, error: String },
    ConstellationMutated { constellation_id: Uuid, summary: String },
    ConstellationStateChanged { constellation_id: Uuid, from: String, to: String },
    /// A `COMMAND_RESULTS` continue frame arrived for a still-running task;
    /// carries the partial action output rather than a terminal outcome.
    CommandOutputReceived { device_id: String, task_id: Uuid, session_id: Uuid, output: Vec<ActionResult> },
}

impl CoreEvent {
    pub fn device_disconnected(device_id: impl Into<String>, reason: DisconnectReason) -> Self {
        Self::DeviceStatusChanged {
            device_id: device_id.into(),
            from: "connected".into(),
            to: "disconnected".into(),
            reason: Some(format!("{reason:?}")),
        }
    }
}

/// One published event plus its bus-assigned envelope fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub sequence: SequenceNumber,
    pub published_at: DateTime<Utc>,
    pub event: CoreEvent,
}

/// Process-local pub/sub singleton. Pass by `Arc` reference to components
/// that need it rather than reaching for a global.
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, next_sequence: std::sync::atomic::AtomicU64::new(0) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Publish an event. Delivery is fan-out to every current subscriber in
    /// publication order; a subscriber that falls behind the channel's
    /// capacity sees `Lagged` rather than blocking this call.
    pub fn publish(&self, event: CoreEvent) -> SequenceNumber {
        let sequence = self.next_sequence.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let envelope = EventEnvelope { event_id: Uuid::new_v4(), sequence, published_at: Utc::now(), event };
        // No subscribers is not an error: events published before anyone is
        // listening are simply dropped.
        let _ = self.sender.send(envelope);
        sequence
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
