//! AIP (application integration protocol) message types.
//!
//! Every frame on the wire is a single JSON object matching `Envelope`.
//! Unknown top-level fields are preserved via `extra` so a frame can be
//! decoded, inspected, and re-encoded without losing information the codec
//! doesn't model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Message type tag, shared by both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Register,
    Heartbeat,
    Task,
    DeviceInfoRequest,
    DeviceInfoResponse,
    Command,
    CommandResults,
    TaskEnd,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::Heartbeat => "HEARTBEAT",
            Self::Task => "TASK",
            Self::DeviceInfoRequest => "DEVICE_INFO_REQUEST",
            Self::DeviceInfoResponse => "DEVICE_INFO_RESPONSE",
            Self::Command => "COMMAND",
            Self::CommandResults => "COMMAND_RESULTS",
            Self::TaskEnd => "TASK_END",
            Self::Error => "ERROR",
        }
    }
}

/// Status tag carried on every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusValue {
    Ok,
    Continue,
    Completed,
    Failed,
    Error,
}

/// Distinguishes a constellation (coordinator) peer from a device peer;
/// used by the relay to route `TASK` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Constellation,
    Device,
}

/// One AIP frame. `payload` is left as a raw `Value` here; `protocol::codec`
/// interprets it against `type` into a typed payload struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: StatusValue,
    pub timestamp: DateTime<Utc>,
    pub client_type: ClientType,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_response_id: Option<Uuid>,
    #[serde(default)]
    pub payload: Value,
    /// Fields neither named above nor consumed into `payload`; preserved so
    /// a frame decodes, is inspected, and re-encodes without losing data.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(
        message_type: MessageType,
        status: StatusValue,
        client_type: ClientType,
        client_id: impl Into<String>,
        session_id: Uuid,
        payload: Value,
    ) -> Self {
        Self {
            message_type,
            status,
            timestamp: Utc::now(),
            client_type,
            client_id: client_id.into(),
            target_id: None,
            session_id,
            response_id: None,
            prev_response_id: None,
            payload,
            extra: Map::new(),
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_response_to(mut self, prev_response_id: Uuid) -> Self {
        self.prev_response_id = Some(prev_response_id);
        self
    }
}

/// `REGISTER` payload (device → relay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub device_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `DEVICE_INFO_REQUEST` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfoRequestPayload {
    pub request_id: Uuid,
}

/// `DEVICE_INFO_RESPONSE` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfoResponsePayload {
    pub device_id: String,
    #[serde(default)]
    pub device_info: Map<String, Value>,
}

/// `TASK` payload (constellation → relay → device); `target_id` travels on
/// the envelope, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: Uuid,
    pub description: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// `COMMAND` payload; the core forwards `actions` without interpreting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: String,
    pub status: StatusValue,
    #[serde(default)]
    pub result: Value,
}

/// `COMMAND_RESULTS` payload; envelope `status = continue` while streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultsPayload {
    pub action_results: Vec<ActionResult>,
}

/// `TASK_END` payload; envelope `status ∈ {completed, failed}` carries the
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEndPayload {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// `ERROR` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_code: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}
