//! Domain error taxonomy for the constellation coordinator.
//!
//! One enum per concern: configuration, transport, protocol, registry, DAG,
//! editor, and scheduler errors are kept distinct rather than folded into a
//! single catch-all, so callers can match on the failure mode that matters
//! to them.

use thiserror::Error;
use uuid::Uuid;

/// Errors from the Device Registry (C1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device already registered: {0}")]
    DuplicateId(String),

    #[error("unknown device: {0}")]
    Unknown(String),

    #[error("illegal status transition for {device_id}: {from} -> {to}")]
    IllegalTransition {
        device_id: String,
        from: String,
        to: String,
    },

    #[error("device profile for {0} is missing an OS tag (neither `os` nor `metadata.os` set)")]
    MissingOs(String),

    #[error("invalid endpoint URL for device {device_id}: {reason}")]
    InvalidEndpoint { device_id: String, reason: String },
}

/// Errors from the transport layer (C2).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("TLS handshake failed: {0}")]
    TlsFailure(String),

    #[error("read/write error on session: {0}")]
    IoError(String),

    #[error("peer closed the connection (code={code:?}, reason={reason})")]
    ClosedByPeer { code: Option<u16>, reason: String },

    #[error("session already closed")]
    AlreadyClosed,
}

/// Errors from the AIP codec (C3).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("missing correlation id on message of type {0}")]
    MissingCorrelationId(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Errors surfaced by the message router (C4) and connection coordinator (C7).
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no pending submission for device {device_id} session {session_id}")]
    NoSuchSubmission { device_id: String, session_id: Uuid },

    #[error("registration confirmation not received within timeout")]
    RegistrationTimeout,

    #[error("device is not connected: {0}")]
    NotConnected(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Errors from DAG mutation (C8).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DagError {
    #[error("task already exists: {0}")]
    DuplicateTask(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("edge not found: {0}")]
    EdgeNotFound(Uuid),

    #[error("edge would create a cycle")]
    CycleDetected,

    #[error("self-loop edges are not allowed (task {0})")]
    SelfLoop(Uuid),

    #[error("edge endpoint missing: {0}")]
    MissingEndpoint(Uuid),

    #[error("task {0} is running and cannot be mutated")]
    TaskRunning(Uuid),

    #[error("task {0} is in a terminal or running state and cannot be removed")]
    TaskNotRemovable(Uuid),

    #[error("task {0} must be Pending or WaitingDependency to start, was {1}")]
    InvalidStartState(Uuid, String),

    #[error("task {0} must be Running to complete, was {1}")]
    InvalidCompleteState(Uuid, String),
}

/// Errors from the DAG Editor's command journal (C9).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditorError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error("constellation is executing and cannot be cleared")]
    CannotClearWhileExecuting,

    #[error("editing is blocked: task {0} is currently running")]
    IllegalState(Uuid),

    #[error("load failed: {0}")]
    LoadFailed(String),
}

/// Errors from the scheduler (C10).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("scheduler was cancelled")]
    Cancelled,
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid heartbeat_interval_s: {0}, must be > 0")]
    InvalidHeartbeatInterval(u64),

    #[error("invalid default_task_timeout_s: {0}, must be > 0")]
    InvalidTaskTimeout(u64),

    #[error(
        "invalid backoff configuration: initial_reconnect_delay_s ({0}) must be <= max_reconnect_delay_s ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("invalid default_max_retries: {0}, must be > 0")]
    InvalidMaxRetries(u32),

    #[error("invalid max_history_size: {0}, must be > 0")]
    InvalidHistorySize(usize),

    #[error("unknown assignment_strategy: {0}")]
    UnknownAssignmentStrategy(String),
}
