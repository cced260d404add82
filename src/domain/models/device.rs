//! Device domain model.
//!
//! A `DeviceProfile` is the authoritative record the Device Registry (C1)
//! holds for one remote device reachable through the relay server.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Disconnected,
    Connecting,
    Connected,
    Idle,
    Busy,
    Failed,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Failed => "failed",
        }
    }

    /// Legal transition table.
    ///
    /// ```text
    /// Disconnected -> Connecting -> Connected -> Idle <-> Busy
    /// Connecting   -> Failed
    /// Connected/Idle/Busy -> Disconnected
    /// any          -> Failed
    /// Failed       -> Connecting
    /// ```
    pub fn can_transition_to(&self, target: Self) -> bool {
        use DeviceStatus::*;
        match (*self, target) {
            (_, Failed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Idle) => true,
            (Idle, Busy) => true,
            (Busy, Idle) => true,
            (Connected, Disconnected) | (Idle, Disconnected) | (Busy, Disconnected) => true,
            (Failed, Connecting) => true,
            _ => false,
        }
    }

    /// Whether the device is reachable for task submission.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy | Self::Connected)
    }
}

/// An immutable snapshot of a device's profile, handed to readers.
///
/// Mutation only happens through `DeviceRegistry`, which serializes writes
/// per `device_id`; this struct itself carries no interior mutability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_id: String,
    pub endpoint_url: String,
    pub os: String,
    pub capabilities: HashSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub status: DeviceStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub connection_attempts: u32,
    pub max_retries: u32,
    pub current_task_id: Option<uuid::Uuid>,
    /// Opaque map populated post-handshake from `DEVICE_INFO_RESPONSE`.
    #[serde(default)]
    pub system_info: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceProfile {
    /// Construct a new profile in the `Disconnected` state.
    ///
    /// `os` must be supplied directly or via `metadata["os"]`; callers should
    /// prefer [`DeviceProfile::resolve_os`] to apply the metadata fallback
    /// before calling this.
    pub fn new(
        device_id: impl Into<String>,
        endpoint_url: impl Into<String>,
        os: impl Into<String>,
        capabilities: impl IntoIterator<Item = String>,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            device_id: device_id.into(),
            endpoint_url: endpoint_url.into(),
            os: os.into(),
            capabilities: capabilities.into_iter().collect(),
            metadata: Map::new(),
            status: DeviceStatus::Disconnected,
            last_heartbeat_at: None,
            connection_attempts: 0,
            max_retries,
            current_task_id: None,
            system_info: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Resolve a missing top-level `os` from `metadata.os`, returning the
    /// resolved tag and whether a fallback occurred (caller should log when
    /// `true`, per the open-question resolution).
    pub fn resolve_os(os: Option<&str>, metadata: &Map<String, Value>) -> Option<(String, bool)> {
        if let Some(os) = os.filter(|s| !s.is_empty()) {
            return Some((os.to_string(), false));
        }
        metadata
            .get("os")
            .and_then(Value::as_str)
            .map(|s| (s.to_string(), true))
    }

    pub fn has_capabilities(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

/// Filter predicate used by `DeviceRegistry::list`.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub status: Option<DeviceStatus>,
    pub capability: Option<String>,
}

impl DeviceFilter {
    pub fn matches(&self, profile: &DeviceProfile) -> bool {
        if let Some(status) = self.status {
            if profile.status != status {
                return false;
            }
        }
        if let Some(cap) = &self.capability {
            if !profile.capabilities.contains(cap) {
                return false;
            }
        }
        true
    }
}
