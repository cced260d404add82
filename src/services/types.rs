//! Shared cross-service types for the connection fabric.
//!
//! Centralized here instead of owned by one component because several
//! components need to speak about the same outcomes without back-referencing
//! each other: breaking the cycle by id and small shared value types instead
//! of back-pointers keeps the router and coordinator decoupled.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What the scheduler hands to `ConnectionCoordinator::submit_task` — enough
/// to build a `TASK` frame without exposing `TaskNode` to the transport
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: Uuid,
    pub description: String,
    pub data: Map<String, Value>,
    pub timeout_s: u64,
}

/// Why a pending submission resolved as a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    Disconnected,
    Timeout,
    Cancelled,
    DeviceUnavailable,
    TaskError(String),
}

/// Terminal resolution of one pending submission: exactly one of these
/// resolves a submission, ever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubmissionOutcome {
    Completed(Value),
    Failed(FailureReason),
}

/// Why a device's receive loop or heartbeat loop is tearing the connection
/// down; passed to the coordinator's disconnect handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    ClosedByPeer,
    TransportError(String),
    ProtocolErrorThreshold,
    HeartbeatTimeout,
    Requested,
}

/// Events the message router raises for its caller. Kept as plain data
/// rather than a back-pointer to the coordinator.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    HeartbeatAck { device_id: String },
    DeviceInfoReceived { device_id: String, info: serde_json::Map<String, Value> },
    Disconnected { device_id: String, reason: DisconnectReason },
}
